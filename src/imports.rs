use std::cell::RefCell;
use std::collections::HashMap;

use log::debug;
use rhai::{Engine, EvalAltResult, Module, ModuleResolver, Position, Scope, Shared};

/// Import namespace for a script: native modules built by the host plus
/// source modules compiled on first import and cached afterwards.
#[derive(Default)]
pub struct ScriptImports {
    native: HashMap<String, Shared<Module>>,
    sources: HashMap<String, String>,
    compiled: RefCell<HashMap<String, Shared<Module>>>,
}

impl ScriptImports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_module(&mut self, name: impl Into<String>, module: Module) {
        self.native.insert(name.into(), module.into());
    }

    pub fn add_source_module(&mut self, name: impl Into<String>, source: impl Into<String>) {
        let name = name.into();
        self.compiled.borrow_mut().remove(&name);
        self.sources.insert(name, source.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.native.contains_key(name) || self.sources.contains_key(name)
    }
}

impl ModuleResolver for ScriptImports {
    fn resolve(
        &self,
        engine: &Engine,
        _source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> Result<Shared<Module>, Box<EvalAltResult>> {
        if let Some(module) = self.native.get(path) {
            return Ok(module.clone());
        }
        if let Some(module) = self.compiled.borrow().get(path) {
            return Ok(module.clone());
        }
        let Some(source) = self.sources.get(path) else {
            return Err(Box::new(EvalAltResult::ErrorModuleNotFound(path.to_string(), pos)));
        };

        debug!("[imports] compiling source module '{path}'");
        let ast = engine
            .compile(source)
            .map_err(|err| Box::new(EvalAltResult::ErrorInModule(path.to_string(), err.into(), pos)))?;
        let module: Shared<Module> = Module::eval_ast_as_new(Scope::new(), &ast, engine)
            .map_err(|err| Box::new(EvalAltResult::ErrorInModule(path.to_string(), err, pos)))?
            .into();
        self.compiled.borrow_mut().insert(path.to_string(), module.clone());
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_modules_resolve_their_own_imports() {
        let mut imports = ScriptImports::new();
        imports.add_source_module("vec2", "fn new(x, y) { #{ x: x, y: y } }");
        imports.add_source_module(
            "offset",
            r#"
                import "vec2" as vec2;
                fn shifted(x) { import "vec2" as vec2; vec2::new(x + 1, x + 2) }
            "#,
        );
        let mut engine = Engine::new();
        engine.set_module_resolver(imports);
        let sum: i64 = engine
            .eval(r#"import "offset" as offset; let v = offset::shifted(1); v.x + v.y"#)
            .expect("modules should resolve");
        assert_eq!(sum, 5);
    }

    #[test]
    fn unknown_module_is_reported() {
        let mut engine = Engine::new();
        engine.set_module_resolver(ScriptImports::new());
        let err = engine.run(r#"import "missing" as missing;"#).expect_err("import should fail");
        assert!(matches!(*err, EvalAltResult::ErrorModuleNotFound(ref name, _) if name == "missing"));
    }
}
