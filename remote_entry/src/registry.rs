use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serializer::{ArgValue, ExceptionInfo, Thunk};

use crate::FunctionOutput;

/// What one registered function looks like once boxed: given the `Thunk` (so it can read both
/// `args` and `kwargs`), produces a [`FunctionOutput`].
pub type UserFunction =
    Arc<dyn Fn(&Thunk) -> Pin<Box<dyn Future<Output = FunctionOutput> + Send>> + Send + Sync>;

/// The process-local table mapping `func_ref` strings to callables, populated once at startup and
/// never mutated afterward -- the same shape as the teacher's scheme/driver registries.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, UserFunction>,
}

impl FunctionRegistry {
    pub fn new() -> FunctionRegistry {
        FunctionRegistry {
            functions: HashMap::new(),
        }
    }

    pub fn register(&mut self, func_ref: impl Into<String>, function: UserFunction) {
        self.functions.insert(func_ref.into(), function);
    }

    pub fn get(&self, func_ref: &str) -> Option<&UserFunction> {
        self.functions.get(func_ref)
    }
}

/// Convenience for registering a plain synchronous function that cannot fail and produces no
/// large objects or sub-calls -- the common case in tests.
pub fn simple(f: impl Fn(&Thunk) -> Result<ArgValue, ExceptionInfo> + Send + Sync + 'static) -> UserFunction {
    Arc::new(move |thunk| {
        let result = f(thunk);
        Box::pin(async move {
            FunctionOutput {
                value: result,
                called_logic_keys: Default::default(),
                pending_uploads: vec![],
            }
        })
    })
}
