//! The embedded script engine.
//!
//! Code bodies are compiled through the engine's `Function` constructor with
//! an explicit parameter list, so the only names a body can bind are the
//! parameters it is handed. Values cross into and out of the engine as JSON,
//! using the `JSON` intrinsics captured at boot before any user code runs.
//!
//! Every enclosure shares one realm, so the realm is locked down at capture:
//! globals outside a fixed allow-list are removed, `Math.random` is dropped
//! and everything reachable from the global object is frozen.

use boa_engine::ast::expression::Expression;
use boa_engine::ast::scope::Scope;
use boa_engine::ast::{Statement, StatementListItem};
use boa_engine::object::builtins::JsPromise;
use boa_engine::object::{FunctionObjectBuilder, JsObject};
use boa_engine::parser::Parser;
use boa_engine::vm::RuntimeLimits;
use boa_engine::{
    Context, JsArgs, JsError, JsNativeError, JsResult, JsString, JsValue, NativeFunction, Source,
};
use serde_json::Value;

use enclosure_core::{Error, Result};

use crate::config::WorkerConfig;

/// Strips the global object down to deterministic built-ins and deep-freezes
/// the realm, including intrinsics only reachable through instances.
const LOCKDOWN: &str = r#"(() => {
  'use strict';
  const keep = new Set([
    'globalThis', 'undefined', 'NaN', 'Infinity',
    'Object', 'Function', 'Array', 'Number', 'Boolean', 'String', 'Symbol', 'BigInt',
    'Math', 'JSON', 'Reflect', 'Proxy', 'Promise', 'Iterator',
    'Map', 'Set', 'WeakMap', 'WeakSet', 'RegExp', 'ArrayBuffer', 'DataView',
    'Error', 'AggregateError', 'EvalError', 'RangeError', 'ReferenceError',
    'SyntaxError', 'TypeError', 'URIError',
    'Int8Array', 'Uint8Array', 'Uint8ClampedArray', 'Int16Array', 'Uint16Array',
    'Int32Array', 'Uint32Array', 'Float32Array', 'Float64Array',
    'BigInt64Array', 'BigUint64Array',
    'parseInt', 'parseFloat', 'isNaN', 'isFinite',
    'encodeURI', 'encodeURIComponent', 'decodeURI', 'decodeURIComponent',
    'escape', 'unescape',
  ]);
  for (const key of Reflect.ownKeys(globalThis)) {
    if (typeof key === 'string' && !keep.has(key)) {
      Reflect.deleteProperty(globalThis, key);
    }
  }
  Reflect.deleteProperty(Math, 'random');

  const pending = [
    globalThis,
    function* () {},
    (function* () {})(),
    async function () {},
    async function* () {},
    [][Symbol.iterator](),
    new Map()[Symbol.iterator](),
    new Set()[Symbol.iterator](),
    ''[Symbol.iterator](),
    /./[Symbol.matchAll](''),
    Object.getPrototypeOf(Int8Array),
  ];
  const seen = new Set();
  while (pending.length > 0) {
    const value = pending.pop();
    if (value === null || (typeof value !== 'object' && typeof value !== 'function')) {
      continue;
    }
    if (seen.has(value)) {
      continue;
    }
    seen.add(value);
    Object.freeze(value);
    pending.push(Object.getPrototypeOf(value));
    for (const key of Reflect.ownKeys(value)) {
      const desc = Reflect.getOwnPropertyDescriptor(value, key);
      if (desc !== undefined) {
        pending.push(desc.value, desc.get, desc.set);
      }
    }
  }
})();"#;

/// Engine intrinsics captured before user code can tamper with them.
#[derive(Clone)]
pub struct Script {
    function: JsObject,
    stringify: JsObject,
    parse: JsObject,
    freeze: JsObject,
}

/// Turn an engine error into a `Script` error.
pub fn script_error(err: JsError) -> Error {
    Error::Script(err.to_string())
}

/// A thrown `Error` carrying the message of `err`.
pub fn throwable(err: &Error) -> JsError {
    JsNativeError::error().with_message(err.to_string()).into()
}

pub fn type_error(message: impl Into<String>) -> JsError {
    JsNativeError::typ().with_message(message.into()).into()
}

/// The object behind `value`, if it is one.
pub fn object_of(value: &JsValue) -> Option<JsObject> {
    value.as_object().map(|o| o.clone())
}

/// Wrap a Rust closure as a script function.
pub fn native<F>(context: &mut Context, name: &str, length: usize, f: F) -> JsObject
where
    F: Fn(&JsValue, &[JsValue], &mut Context) -> JsResult<JsValue> + 'static,
{
    // SAFETY: the closures built here capture engine handles that stay rooted
    // for as long as the closure lives; nothing captured is reachable only
    // through the collector.
    let function = unsafe { NativeFunction::from_closure(f) };
    FunctionObjectBuilder::new(context.realm(), function)
        .name(JsString::from(name))
        .length(length)
        .constructor(false)
        .build()
        .into()
}

/// A new engine context with `config`'s limits applied.
pub fn context(config: &WorkerConfig) -> Context {
    let mut context = Context::default();
    context.set_runtime_limits(config.runtime_limits());
    context
}

fn intrinsic(context: &mut Context, path: &str) -> Result<JsObject> {
    let value = context
        .eval(Source::from_bytes(path.as_bytes()))
        .map_err(script_error)?;
    match object_of(&value) {
        Some(object) if object.is_callable() => Ok(object),
        _ => Err(Error::Script(format!("{path} is not a function"))),
    }
}

fn check_wrapped(params: &[&str], body: &str, context: &mut Context) -> Result<()> {
    let source = format!("(function ({}) {{\n{}\n}});", params.join(", "), body);
    let mut parser = Parser::new(Source::from_bytes(source.as_bytes()));
    let parsed = parser
        .parse_script(&Scope::new_global(), context.interner_mut())
        .map_err(|e| Error::Script(format!("SyntaxError: {e}")))?;

    let single_function = match parsed.statements().statements() {
        [StatementListItem::Statement(statement)] => match statement.as_ref() {
            Statement::Expression(Expression::Parenthesized(inner)) => {
                matches!(inner.expression(), Expression::FunctionExpression(_))
            }
            Statement::Expression(Expression::FunctionExpression(_)) => true,
            _ => false,
        },
        _ => false,
    };
    if single_function {
        Ok(())
    } else {
        Err(Error::Script(
            "SyntaxError: code body must not close its function".into(),
        ))
    }
}

impl Script {
    /// Capture the intrinsics of a fresh context, then lock its realm down.
    pub fn capture(context: &mut Context) -> Result<Self> {
        let script = Self {
            function: intrinsic(context, "Function")?,
            stringify: intrinsic(context, "JSON.stringify")?,
            parse: intrinsic(context, "JSON.parse")?,
            freeze: intrinsic(context, "Object.freeze")?,
        };

        // Lockdown runs outside the configured limits.
        let limits = context.runtime_limits();
        context.set_runtime_limits(RuntimeLimits::default());
        let locked = context.eval(Source::from_bytes(LOCKDOWN));
        context.set_runtime_limits(limits);
        locked.map_err(script_error)?;
        Ok(script)
    }

    /// Compile `body` into a function taking `params`, in order.
    ///
    /// The engine parses a body on its own and stops at the first unmatched
    /// `}`, so the whole function is parsed here first and must come out as a
    /// single function expression.
    pub fn compile(&self, params: &[&str], body: &str, context: &mut Context) -> Result<JsObject> {
        check_wrapped(params, body, context)?;
        let args: Vec<JsValue> = params
            .iter()
            .copied()
            .chain(std::iter::once(body))
            .map(|s| JsValue::from(JsString::from(s)))
            .collect();
        let compiled = self
            .function
            .call(&JsValue::undefined(), &args, context)
            .map_err(script_error)?;
        object_of(&compiled).ok_or_else(|| Error::Script("compilation produced no function".into()))
    }

    /// Copy a script value out as JSON. `undefined` and functions become `null`.
    pub fn to_json(&self, value: &JsValue, context: &mut Context) -> Result<Value> {
        if value.is_undefined() {
            return Ok(Value::Null);
        }
        let text = self
            .stringify
            .call(&JsValue::undefined(), std::slice::from_ref(value), context)
            .map_err(script_error)?;
        if text.is_undefined() {
            return Ok(Value::Null);
        }
        let text = text
            .to_string(context)
            .map_err(script_error)?
            .to_std_string_escaped();
        serde_json::from_str(&text).map_err(|e| Error::Script(e.to_string()))
    }

    /// Build a fresh script value from JSON.
    pub fn from_json(&self, value: &Value, context: &mut Context) -> Result<JsValue> {
        let text = serde_json::to_string(value).map_err(|e| Error::Script(e.to_string()))?;
        self.parse
            .call(
                &JsValue::undefined(),
                &[JsValue::from(JsString::from(text.as_str()))],
                context,
            )
            .map_err(script_error)
    }

    /// Freeze `value` if it is an object.
    pub fn freeze(&self, value: JsValue, context: &mut Context) -> Result<JsValue> {
        if object_of(&value).is_none() {
            return Ok(value);
        }
        self.freeze
            .call(&JsValue::undefined(), &[value], context)
            .map_err(script_error)
    }

    /// A pending promise plus the functions that settle it.
    pub fn pending(&self, context: &mut Context) -> (JsValue, JsObject, JsObject) {
        let (promise, functions) = JsPromise::new_pending(context);
        (
            promise.into(),
            functions.resolve.into(),
            functions.reject.into(),
        )
    }

    /// Subscribe to `value` if it is a thenable.
    ///
    /// Returns `false` without subscribing when `value` has no callable
    /// `then`. The callbacks run from the engine's job queue.
    pub fn when_settled<F, R>(
        &self,
        value: &JsValue,
        on_fulfilled: F,
        on_rejected: R,
        context: &mut Context,
    ) -> Result<bool>
    where
        F: Fn(&JsValue, &mut Context) + 'static,
        R: Fn(&JsValue, &mut Context) + 'static,
    {
        let Some(object) = object_of(value) else {
            return Ok(false);
        };
        let then = object
            .get(JsString::from("then"), context)
            .map_err(script_error)?;
        let Some(then) = object_of(&then).filter(JsObject::is_callable) else {
            return Ok(false);
        };

        let fulfilled = native(context, "", 1, move |_, args, ctx| {
            on_fulfilled(args.get_or_undefined(0), ctx);
            Ok(JsValue::undefined())
        });
        let rejected = native(context, "", 1, move |_, args, ctx| {
            on_rejected(args.get_or_undefined(0), ctx);
            Ok(JsValue::undefined())
        });
        then.call(value, &[fulfilled.into(), rejected.into()], context)
            .map_err(script_error)?;
        Ok(true)
    }

    /// Describe a rejection reason.
    pub fn describe(&self, reason: &JsValue, context: &mut Context) -> String {
        match reason.to_string(context) {
            Ok(s) => s.to_std_string_escaped(),
            Err(e) => e.to_string(),
        }
    }
}
