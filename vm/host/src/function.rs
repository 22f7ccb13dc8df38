//! Host functions callable from sandboxed code.

use async_trait::async_trait;
use serde_json::Value;

use enclosure_core::Result;

/// A function the host exposes to an enclosure through `Vm::predefine`.
///
/// Sandboxed code sees it as a function returning a promise. Arguments and
/// results cross the boundary as JSON; an `Err` rejects the promise.
#[async_trait]
pub trait HostFunction: Send + Sync {
    async fn call(&self, args: Vec<Value>) -> Result<Value>;
}

#[async_trait]
impl<F> HostFunction for F
where
    F: Fn(Vec<Value>) -> Result<Value> + Send + Sync,
{
    async fn call(&self, args: Vec<Value>) -> Result<Value> {
        self(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enclosure_core::Error;
    use serde_json::json;

    struct Sum;

    #[async_trait]
    impl HostFunction for Sum {
        async fn call(&self, args: Vec<Value>) -> Result<Value> {
            Ok(json!(args.iter().filter_map(Value::as_i64).sum::<i64>()))
        }
    }

    #[tokio::test]
    async fn closures_are_host_functions() {
        let first = |args: Vec<Value>| args.first().cloned().ok_or(Error::Stopped);
        assert_eq!(
            HostFunction::call(&first, vec![json!(1), json!(2)]).await,
            Ok(json!(1))
        );
        assert_eq!(HostFunction::call(&first, vec![]).await, Err(Error::Stopped));
    }

    #[tokio::test]
    async fn trait_objects_dispatch() {
        let f: Box<dyn HostFunction> = Box::new(Sum);
        assert_eq!(f.call(vec![json!(2), json!(3)]).await, Ok(json!(5)));
    }
}
