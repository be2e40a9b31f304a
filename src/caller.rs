//! Event handler registry: typed closures adapted into a uniform,
//! dynamically invocable interface.
//!
//! A [`Handler`] knows how many arguments its callback declares, decodes
//! inbound JSON values into them, invokes the callback, and collects the
//! return values as an acknowledgement payload. [`IntoHandler`] does that
//! adaptation once per registration for plain closures of up to four
//! [`DeserializeOwned`] arguments; anything more exotic can implement
//! [`Handler`] directly.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;

/// A registered event or acknowledgement callback.
pub trait Handler: Send + Sync {
    /// Number of arguments the callback declares.
    fn arity(&self) -> usize;

    /// Invoke the callback with exactly [`arity`](Handler::arity) values.
    ///
    /// The returned values become the acknowledgement reply payload. Errors
    /// surface to the dispatcher: fatal for event dispatch, logged and
    /// dropped for acknowledgements.
    fn call(&self, args: Vec<Value>) -> Result<Vec<Value>>;
}

/// Conversion of a callback's return value into an acknowledgement payload.
pub trait IntoAck {
    /// Collect the reply values.
    fn into_ack(self) -> Result<Vec<Value>>;
}

impl IntoAck for () {
    fn into_ack(self) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

impl IntoAck for Value {
    fn into_ack(self) -> Result<Vec<Value>> {
        Ok(vec![self])
    }
}

impl IntoAck for Vec<Value> {
    fn into_ack(self) -> Result<Vec<Value>> {
        Ok(self)
    }
}

/// A failing callback aborts dispatch instead of producing a reply.
impl<T: IntoAck> IntoAck for Result<T> {
    fn into_ack(self) -> Result<Vec<Value>> {
        self.and_then(IntoAck::into_ack)
    }
}

/// Adapter from callables to boxed [`Handler`]s.
///
/// `Args` is a marker naming the argument tuple, so one closure type can
/// only ever adapt through the implementation matching its signature.
pub trait IntoHandler<Args> {
    /// Perform the adaptation.
    fn into_handler(self) -> Box<dyn Handler>;
}

/// Marker for values registering through their own [`Handler`] impl.
#[derive(Debug, Clone, Copy)]
pub struct Direct;

impl<H: Handler + 'static> IntoHandler<Direct> for H {
    fn into_handler(self) -> Box<dyn Handler> {
        Box::new(self)
    }
}

struct FnHandler<F, Args> {
    f: F,
    _marker: PhantomData<fn(Args)>,
}

macro_rules! impl_handler {
    ($count:expr $(, $ty:ident)*) => {
        impl<Func, Ret, $($ty,)*> IntoHandler<($($ty,)*)> for Func
        where
            Func: Fn($($ty),*) -> Ret + Send + Sync + 'static,
            Ret: IntoAck,
            $($ty: DeserializeOwned + 'static,)*
        {
            fn into_handler(self) -> Box<dyn Handler> {
                Box::new(FnHandler { f: self, _marker: PhantomData::<fn(($($ty,)*))> })
            }
        }

        impl<Func, Ret, $($ty,)*> Handler for FnHandler<Func, ($($ty,)*)>
        where
            Func: Fn($($ty),*) -> Ret + Send + Sync + 'static,
            Ret: IntoAck,
            $($ty: DeserializeOwned + 'static,)*
        {
            fn arity(&self) -> usize {
                $count
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(&self, args: Vec<Value>) -> Result<Vec<Value>> {
                let mut args = args.into_iter();
                $(let $ty: $ty =
                    serde_json::from_value(args.next().unwrap_or(Value::Null))?;)*
                (self.f)($($ty),*).into_ack()
            }
        }
    };
}

impl_handler!(0);
impl_handler!(1, A1);
impl_handler!(2, A1, A2);
impl_handler!(3, A1, A2, A3);
impl_handler!(4, A1, A2, A3, A4);

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::error::Error;

    fn handler<Args>(f: impl IntoHandler<Args>) -> Box<dyn Handler> {
        f.into_handler()
    }

    #[test]
    fn zero_arguments() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let h = handler(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(h.arity(), 0);
        assert_eq!(h.call(Vec::new()).unwrap(), Vec::<Value>::new());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn typed_arguments() {
        let h = handler(|name: String, count: i64| Value::from(format!("{}x{}", name, count)));
        assert_eq!(h.arity(), 2);
        let reply = h.call(vec![json!("a"), json!(3)]).unwrap();
        assert_eq!(reply, vec![json!("ax3")]);
    }

    #[test]
    fn missing_arguments_fill_with_null() {
        let h = handler(|name: Option<String>| Value::from(name.is_none()));
        assert_eq!(h.call(Vec::new()).unwrap(), vec![json!(true)]);
    }

    #[test]
    fn type_mismatch_is_a_json_error() {
        let h = handler(|_: i64| ());
        assert!(matches!(h.call(vec![json!("nope")]), Err(Error::Json(_))));
    }

    #[test]
    fn result_return_separates_the_error() {
        let h = handler(|ok: bool| -> Result<Vec<Value>> {
            if ok {
                Ok(vec![json!("fine")])
            } else {
                Err(Error::ConnectionClosed)
            }
        });
        assert_eq!(h.call(vec![json!(true)]).unwrap(), vec![json!("fine")]);
        assert!(h.call(vec![json!(false)]).is_err());
    }

    #[test]
    fn direct_handler_impls_register() {
        struct Fixed;
        impl Handler for Fixed {
            fn arity(&self) -> usize {
                0
            }
            fn call(&self, _: Vec<Value>) -> Result<Vec<Value>> {
                Ok(vec![json!(42)])
            }
        }
        let h = handler(Fixed);
        assert_eq!(h.call(Vec::new()).unwrap(), vec![json!(42)]);
    }
}
