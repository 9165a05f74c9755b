use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use rhai::{Array, Dynamic, Engine, EvalAltResult, Module, Position, Scope, INT};
use serde::{Deserialize, Serialize};

use crate::bridge::{register_sprite_api, SharedFrame, SpriteHandle};
use crate::builtins::BuiltinRegistry;
use crate::frame_sync::{CancelToken, ScriptSide};
use crate::imports::ScriptImports;
use crate::sprite::SpriteSet;

/// Name of the native module exposing the frame API and sprite handles.
pub const ENGINE_MODULE: &str = "engine";

/// Script text plus the source modules it may import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptProgram {
    pub name: String,
    pub source: String,
    pub modules: BTreeMap<String, String>,
}

impl ScriptProgram {
    pub fn inline(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self { name: name.into(), source: source.into(), modules: BTreeMap::new() }
    }

    pub fn with_module(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.modules.insert(name.into(), source.into());
        self
    }

    pub fn load<P: AsRef<Path>>(path: impl AsRef<Path>, modules: &BTreeMap<String, P>) -> Result<Self> {
        let path = path.as_ref();
        let source =
            fs::read_to_string(path).with_context(|| format!("Reading script {}", path.display()))?;
        let mut program = Self::inline(path.display().to_string(), source);
        for (name, module_path) in modules {
            let module_path = module_path.as_ref();
            let module_source = fs::read_to_string(module_path)
                .with_context(|| format!("Reading module '{name}' from {}", module_path.display()))?;
            program.modules.insert(name.clone(), module_source);
        }
        Ok(program)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptReport {
    /// The script ran to its end. `globals` holds every serializable global.
    Completed { globals: serde_json::Value },
    Cancelled { last_frame: Option<u64> },
    Failed { message: String },
}

/// Owns the script thread and the channel it reports its outcome on.
pub struct ScriptDriver {
    handle: Option<JoinHandle<()>>,
    reports: Receiver<ScriptReport>,
    report: Option<ScriptReport>,
}

impl ScriptDriver {
    pub fn spawn(
        program: ScriptProgram,
        builtins: BuiltinRegistry,
        sprite_count: usize,
        side: ScriptSide<SpriteSet>,
    ) -> Result<Self> {
        let (report_tx, reports) = mpsc::channel();
        let name = program.name.clone();
        let handle = thread::Builder::new()
            .name("script-driver".to_string())
            .spawn(move || run_script_thread(program, builtins, sprite_count, side, report_tx))
            .with_context(|| format!("Spawning script thread for {name}"))?;
        Ok(Self { handle: Some(handle), reports, report: None })
    }

    pub fn report(&self) -> Option<&ScriptReport> {
        self.report.as_ref()
    }

    pub fn try_report(&mut self) -> Option<&ScriptReport> {
        if self.report.is_none() {
            self.report = self.reports.try_recv().ok();
        }
        self.report.as_ref()
    }

    /// Blocks for the outcome. Only call once the script thread is known to be
    /// exiting; `None` means it died without reporting.
    pub fn wait_report(&mut self) -> Option<&ScriptReport> {
        if self.report.is_none() {
            self.report = self.reports.recv().ok();
        }
        self.report.as_ref()
    }

    pub fn wait_report_timeout(&mut self, timeout: Duration) -> Option<&ScriptReport> {
        if self.report.is_none() {
            match self.reports.recv_timeout(timeout) {
                Ok(report) => self.report = Some(report),
                Err(RecvTimeoutError::Timeout) => warn!("[script] no report after {timeout:?}"),
                Err(RecvTimeoutError::Disconnected) => {}
            }
        }
        self.report.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Joins the script thread. The caller must have cancelled the frame
    /// channel first or the join waits for the script to end on its own.
    pub fn join(&mut self) -> Option<&ScriptReport> {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("[script] script thread panicked");
            }
        }
        self.try_report()
    }
}

fn run_script_thread(
    program: ScriptProgram,
    builtins: BuiltinRegistry,
    sprite_count: usize,
    side: ScriptSide<SpriteSet>,
    reports: Sender<ScriptReport>,
) {
    let report = run_script(program, &builtins, sprite_count, side);
    match &report {
        ScriptReport::Completed { .. } => info!("[script] completed"),
        ScriptReport::Cancelled { last_frame } => info!("[script] cancelled after frame {last_frame:?}"),
        ScriptReport::Failed { message } => log::error!("[script] {message}"),
    }
    let _ = reports.send(report);
}

fn run_script(
    program: ScriptProgram,
    builtins: &BuiltinRegistry,
    sprite_count: usize,
    side: ScriptSide<SpriteSet>,
) -> ScriptReport {
    let cancel = side.cancel_token().clone();
    let frame: SharedFrame = Rc::new(RefCell::new(side));
    let engine = build_engine(&program, builtins, sprite_count, &frame, &cancel);

    let ast = match engine.compile(&program.source) {
        Ok(ast) => ast,
        Err(err) => return ScriptReport::Failed { message: format!("Compiling {}: {err}", program.name) },
    };

    // The script's first statements belong to frame 0, so hold them until it starts.
    if frame.borrow_mut().wait_for_next_frame().is_err() {
        return ScriptReport::Cancelled { last_frame: None };
    }
    debug!("[script] running {}", program.name);

    let mut scope = Scope::new();
    let result = engine.run_ast_with_scope(&mut scope, &ast);
    let last_frame = frame.borrow().last_frame();
    match result {
        Ok(()) => match frame.borrow_mut().finish() {
            Ok(()) => ScriptReport::Completed { globals: collect_globals(&scope) },
            Err(_) => ScriptReport::Cancelled { last_frame },
        },
        Err(err) if cancel.is_cancelled() || is_termination(&err) => ScriptReport::Cancelled { last_frame },
        Err(err) => ScriptReport::Failed { message: format!("Running {}: {err}", program.name) },
    }
}

fn build_engine(
    program: &ScriptProgram,
    builtins: &BuiltinRegistry,
    sprite_count: usize,
    frame: &SharedFrame,
    cancel: &CancelToken,
) -> Engine {
    let mut engine = Engine::new();
    engine.set_fast_operators(true);
    engine.on_print(|text| info!("[script] {text}"));
    engine.on_debug(|text, source, pos| match source {
        Some(source) => debug!("[script] {source} @ {pos:?} | {text}"),
        None => debug!("[script] {pos:?} | {text}"),
    });
    {
        let cancel = cancel.clone();
        engine.on_progress(move |_| cancel.is_cancelled().then_some(Dynamic::UNIT));
    }
    register_sprite_api(&mut engine);
    builtins.install(&mut engine);

    let mut imports = ScriptImports::new();
    imports.add_module(ENGINE_MODULE, engine_module(frame, sprite_count));
    for (name, source) in &program.modules {
        imports.add_source_module(name.clone(), source.clone());
    }
    engine.set_module_resolver(imports);
    engine
}

fn engine_module(frame: &SharedFrame, sprite_count: usize) -> Module {
    let mut module = Module::new();
    let sprites: Array =
        (0..sprite_count).map(|index| Dynamic::from(SpriteHandle::new(index, frame.clone()))).collect();
    module.set_var("sprites", sprites);

    let waiting = frame.clone();
    module.set_native_fn("wait_for_next_frame", move || -> Result<(), Box<EvalAltResult>> {
        waiting
            .borrow_mut()
            .wait_for_next_frame()
            .map(|_| ())
            .map_err(|_| Box::new(EvalAltResult::ErrorTerminated(Dynamic::UNIT, Position::NONE)))
    });

    let current = frame.clone();
    module.set_native_fn("frame", move || -> Result<INT, Box<EvalAltResult>> {
        Ok(current.borrow().frame().map_or(-1, |frame| frame as INT))
    });
    module
}

fn is_termination(err: &EvalAltResult) -> bool {
    match err {
        EvalAltResult::ErrorTerminated(..) => true,
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) | EvalAltResult::ErrorInModule(_, inner, _) => {
            is_termination(inner)
        }
        _ => false,
    }
}

fn collect_globals(scope: &Scope) -> serde_json::Value {
    let mut globals = serde_json::Map::new();
    for (name, _constant, value) in scope.iter() {
        match rhai::serde::from_dynamic::<serde_json::Value>(&value) {
            Ok(json) => {
                globals.insert(name.to_string(), json);
            }
            Err(err) => debug!("[script] global '{name}' is not serializable: {err}"),
        }
    }
    serde_json::Value::Object(globals)
}
