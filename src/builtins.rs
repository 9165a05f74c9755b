//! Natively implemented functions injected into script environments.

use std::fmt;
use std::sync::Arc;

use log::debug;
use rand::Rng;
use rhai::{Dynamic, Engine, EvalAltResult, FLOAT};

use crate::bridge::{float_arg, BridgeError};

/// Highest argument count a builtin can be called with from a script.
pub const MAX_BUILTIN_ARITY: usize = 4;

pub type NativeFn = Arc<dyn Fn(&[Dynamic]) -> Result<Dynamic, BridgeError> + Send + Sync>;

#[derive(Clone)]
pub struct BuiltinFunction {
    name: String,
    func: NativeFn,
}

impl BuiltinFunction {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Dynamic]) -> Result<Dynamic, BridgeError> + Send + Sync + 'static,
    {
        Self { name: name.into(), func: Arc::new(func) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Dynamic]) -> Result<Dynamic, BridgeError> {
        (self.func)(args)
    }

    fn call_from_script(&self, args: &[Dynamic]) -> Result<Dynamic, Box<EvalAltResult>> {
        self.call(args).map_err(BridgeError::into_script_error)
    }
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinFunction").field("name", &self.name).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub registered: usize,
    /// First already-registered name, at which the batch stopped.
    pub stopped_at: Option<String>,
}

/// Ordered, name-unique collection of builtins. Built during host setup and
/// moved into the script driver before the script thread starts.
#[derive(Debug, Clone, Default)]
pub struct BuiltinRegistry {
    functions: Vec<BuiltinFunction>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_all(default_builtins());
        registry
    }

    /// Adds `func` under `name` unless the name is taken. Returns whether the
    /// function was added; the first registration always wins.
    pub fn register<F>(&mut self, name: impl Into<String>, func: F) -> bool
    where
        F: Fn(&[Dynamic]) -> Result<Dynamic, BridgeError> + Send + Sync + 'static,
    {
        self.register_function(BuiltinFunction::new(name, func))
    }

    pub fn register_function(&mut self, function: BuiltinFunction) -> bool {
        if self.contains(function.name()) {
            debug!("[builtins] '{}' already registered, ignoring", function.name());
            return false;
        }
        self.functions.push(function);
        true
    }

    /// Registers a batch in order, stopping at the first name that is already
    /// registered. Entries after that one are not examined, even when their
    /// names are new.
    pub fn register_all(&mut self, functions: impl IntoIterator<Item = BuiltinFunction>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for function in functions {
            if self.contains(function.name()) {
                debug!("[builtins] batch stopped at duplicate '{}'", function.name());
                outcome.stopped_at = Some(function.name().to_string());
                break;
            }
            self.functions.push(function);
            outcome.registered += 1;
        }
        outcome
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.iter().any(|function| function.name() == name)
    }

    pub fn get(&self, name: &str) -> Option<&BuiltinFunction> {
        self.functions.iter().find(|function| function.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.functions.iter().map(BuiltinFunction::name).collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuiltinFunction> {
        self.functions.iter()
    }

    /// Exposes every builtin as a global script function accepting up to
    /// [`MAX_BUILTIN_ARITY`] arguments.
    pub fn install(&self, engine: &mut Engine) {
        for function in &self.functions {
            install_function(engine, function);
        }
    }
}

macro_rules! register_arity {
    ($engine:expr, $function:expr $(, $arg:ident)*) => {{
        let function = $function.clone();
        $engine.register_fn(
            function.name().to_string(),
            move |$($arg: Dynamic),*| -> Result<Dynamic, Box<EvalAltResult>> {
                function.call_from_script(&[$($arg),*])
            },
        );
    }};
}

fn install_function(engine: &mut Engine, function: &BuiltinFunction) {
    register_arity!(engine, function);
    register_arity!(engine, function, a);
    register_arity!(engine, function, a, b);
    register_arity!(engine, function, a, b, c);
    register_arity!(engine, function, a, b, c, d);
}

pub fn default_builtins() -> Vec<BuiltinFunction> {
    vec![
        BuiltinFunction::new("rand_float", |args| {
            expect_arity(args, 0)?;
            Ok(Dynamic::from_float(rand::thread_rng().gen::<f64>() as FLOAT))
        }),
        BuiltinFunction::new("rand_range", |args| {
            expect_arity(args, 2)?;
            let min = float_arg("min", &args[0])?;
            let max = float_arg("max", &args[1])?;
            if min >= max {
                return Err(BridgeError::EmptyRange { min, max });
            }
            Ok(Dynamic::from_float(rand::thread_rng().gen_range(min..max) as FLOAT))
        }),
    ]
}

pub fn expect_arity(args: &[Dynamic], expected: usize) -> Result<(), BridgeError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(BridgeError::ArgumentCount { expected, found: args.len() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: i64) -> BuiltinFunction {
        BuiltinFunction::new(format!("const_{value}"), move |_| Ok(Dynamic::from_int(value)))
    }

    fn named(name: &str, value: i64) -> BuiltinFunction {
        BuiltinFunction::new(name, move |_| Ok(Dynamic::from_int(value)))
    }

    #[test]
    fn duplicate_register_keeps_first_function() {
        let mut registry = BuiltinRegistry::new();
        assert!(registry.register("answer", |_| Ok(Dynamic::from_int(42))));
        assert!(!registry.register("answer", |_| Ok(Dynamic::from_int(7))));
        assert_eq!(registry.len(), 1);
        let value = registry.get("answer").expect("registered").call(&[]).expect("call");
        assert_eq!(value.as_int(), Ok(42));
    }

    #[test]
    fn batch_stops_at_first_duplicate() {
        let mut registry = BuiltinRegistry::new();
        registry.register_function(named("b", 0));
        let outcome = registry.register_all(vec![named("a", 1), named("b", 2), named("c", 3)]);
        assert_eq!(outcome, BatchOutcome { registered: 1, stopped_at: Some("b".to_string()) });
        assert_eq!(registry.names(), vec!["b", "a"]);
        assert!(!registry.contains("c"), "entries after the duplicate are skipped");
        let b = registry.get("b").expect("b").call(&[]).expect("call");
        assert_eq!(b.as_int(), Ok(0));
    }

    #[test]
    fn batch_without_duplicates_preserves_order() {
        let mut registry = BuiltinRegistry::new();
        let outcome = registry.register_all((1..=3).map(constant));
        assert_eq!(outcome.registered, 3);
        assert_eq!(outcome.stopped_at, None);
        assert_eq!(registry.names(), vec!["const_1", "const_2", "const_3"]);
    }

    #[test]
    fn installed_builtins_are_callable_at_every_arity() {
        let mut registry = BuiltinRegistry::new();
        registry.register("count_args", |args| Ok(Dynamic::from_int(args.len() as i64)));
        let mut engine = Engine::new();
        registry.install(&mut engine);
        for (source, expected) in [("count_args()", 0), ("count_args(1)", 1), ("count_args(1, \"a\", 2.0, ())", 4)] {
            let value: i64 = engine.eval(source).expect(source);
            assert_eq!(value, expected);
        }
    }

    #[test]
    fn builtin_errors_are_catchable_by_scripts() {
        let mut registry = BuiltinRegistry::new();
        registry.register_all(default_builtins());
        let mut engine = Engine::new();
        registry.install(&mut engine);
        let kind: String = engine
            .eval(r#"let kind = ""; try { rand_range(1.0) } catch (err) { kind = err.kind; } kind"#)
            .expect("script should catch the bridge error");
        assert_eq!(kind, "ArgumentCount");
    }

    #[test]
    fn empty_range_reports_its_bounds() {
        let registry = BuiltinRegistry::with_defaults();
        let rand_range = registry.get("rand_range").expect("default builtin");
        let err = rand_range.call(&[Dynamic::from_int(5), Dynamic::from_float(1.5)]).expect_err("empty range");
        assert_eq!(err, BridgeError::EmptyRange { min: 5.0, max: 1.5 });

        let mut engine = Engine::new();
        registry.install(&mut engine);
        let bounds: rhai::Array = engine
            .eval(r#"let b = []; try { rand_range(2, 2) } catch (err) { b = [err.kind, err.min, err.max]; } b"#)
            .expect("script should catch the bridge error");
        assert_eq!(bounds[0].clone().into_string().ok(), Some("EmptyRange".to_string()));
        assert_eq!(bounds[1].as_float().ok(), Some(2.0));
        assert_eq!(bounds[2].as_float().ok(), Some(2.0));
    }
}
