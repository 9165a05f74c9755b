//! Script-facing handles over host sprites.

use std::cell::RefCell;
use std::rc::Rc;

use rhai::{Dynamic, Engine, EvalAltResult, Map, Position, FLOAT, INT};
use thiserror::Error;

use crate::frame_sync::ScriptSide;
use crate::sprite::{Movable, SpriteSet};

/// Script-thread view of the frame channel; the sprite set is only present
/// while a tick is running.
pub type SharedFrame = Rc<RefCell<ScriptSide<SpriteSet>>>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error("wrong number of arguments: expected {expected}, found {found}")]
    ArgumentCount { expected: usize, found: usize },
    #[error("invalid type for argument '{name}': expected {expected}, found {found}")]
    ArgumentType { name: String, expected: String, found: String },
    #[error("sprite {index} is not available outside a frame")]
    Detached { index: usize },
    #[error("empty range {min}..{max}")]
    EmptyRange { min: f64, max: f64 },
    #[error("{0}")]
    Native(String),
}

impl BridgeError {
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::ArgumentCount { .. } => "ArgumentCount",
            BridgeError::ArgumentType { .. } => "ArgumentType",
            BridgeError::Detached { .. } => "Detached",
            BridgeError::EmptyRange { .. } => "EmptyRange",
            BridgeError::Native(_) => "Native",
        }
    }

    /// Converts into a catchable script error whose value is an object map
    /// (`kind`, `message` and the structured fields of the variant).
    pub fn into_script_error(self) -> Box<EvalAltResult> {
        let mut value = Map::new();
        value.insert("kind".into(), Dynamic::from(self.kind()));
        value.insert("message".into(), Dynamic::from(self.to_string()));
        match &self {
            BridgeError::ArgumentCount { expected, found } => {
                value.insert("expected".into(), Dynamic::from_int(*expected as INT));
                value.insert("found".into(), Dynamic::from_int(*found as INT));
            }
            BridgeError::ArgumentType { name, expected, found } => {
                value.insert("name".into(), Dynamic::from(name.clone()));
                value.insert("expected".into(), Dynamic::from(expected.clone()));
                value.insert("found".into(), Dynamic::from(found.clone()));
            }
            BridgeError::Detached { index } => {
                value.insert("index".into(), Dynamic::from_int(*index as INT));
            }
            BridgeError::EmptyRange { min, max } => {
                value.insert("min".into(), Dynamic::from_float(*min as FLOAT));
                value.insert("max".into(), Dynamic::from_float(*max as FLOAT));
            }
            BridgeError::Native(_) => {}
        }
        Box::new(EvalAltResult::ErrorRuntime(Dynamic::from_map(value), Position::NONE))
    }
}

/// Reads a numeric script value as a host float. Integers widen; nothing else
/// converts.
pub fn to_float(value: &Dynamic) -> Option<f64> {
    if let Ok(float) = value.as_float() {
        return Some(float as f64);
    }
    value.as_int().ok().map(|int| int as f64)
}

pub fn float_arg(name: &str, value: &Dynamic) -> Result<f64, BridgeError> {
    to_float(value).ok_or_else(|| BridgeError::ArgumentType {
        name: name.to_string(),
        expected: "float".to_string(),
        found: value.type_name().to_string(),
    })
}

/// `move(x, y)`: both arguments are validated before the target changes.
pub fn call_move(target: &mut dyn Movable, args: &[Dynamic]) -> Result<Dynamic, BridgeError> {
    let [x, y] = args else {
        return Err(BridgeError::ArgumentCount { expected: 2, found: args.len() });
    };
    let x = float_arg("x", x)?;
    let y = float_arg("y", y)?;
    target.move_to(x, y);
    Ok(Dynamic::UNIT)
}

/// Non-owning handle to one sprite of the frame currently held by the script.
#[derive(Clone)]
pub struct SpriteHandle {
    index: usize,
    frame: SharedFrame,
}

impl SpriteHandle {
    pub fn new(index: usize, frame: SharedFrame) -> Self {
        Self { index, frame }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn call_move(&self, args: &[Dynamic]) -> Result<Dynamic, BridgeError> {
        let mut frame = self.frame.borrow_mut();
        let sprite = frame
            .payload_mut()
            .and_then(|sprites| sprites.get_mut(self.index))
            .ok_or(BridgeError::Detached { index: self.index })?;
        call_move(sprite, args)
    }

    fn script_move(&self, args: &[Dynamic]) -> Result<Dynamic, Box<EvalAltResult>> {
        self.call_move(args).map_err(BridgeError::into_script_error)
    }
}

// `move` is registered for every arity up to three so a miscounted call reaches
// the bridge's own validation instead of failing function lookup.
fn move_0(sprite: SpriteHandle) -> Result<Dynamic, Box<EvalAltResult>> {
    sprite.script_move(&[])
}

fn move_1(sprite: SpriteHandle, a: Dynamic) -> Result<Dynamic, Box<EvalAltResult>> {
    sprite.script_move(&[a])
}

fn move_2(sprite: SpriteHandle, a: Dynamic, b: Dynamic) -> Result<Dynamic, Box<EvalAltResult>> {
    sprite.script_move(&[a, b])
}

fn move_3(sprite: SpriteHandle, a: Dynamic, b: Dynamic, c: Dynamic) -> Result<Dynamic, Box<EvalAltResult>> {
    sprite.script_move(&[a, b, c])
}

fn sprite_index(sprite: SpriteHandle) -> INT {
    sprite.index as INT
}

fn sprite_x(sprite: SpriteHandle) -> Result<FLOAT, Box<EvalAltResult>> {
    sprite_position(&sprite).map(|(x, _)| x)
}

fn sprite_y(sprite: SpriteHandle) -> Result<FLOAT, Box<EvalAltResult>> {
    sprite_position(&sprite).map(|(_, y)| y)
}

fn sprite_position(sprite: &SpriteHandle) -> Result<(FLOAT, FLOAT), Box<EvalAltResult>> {
    let frame = sprite.frame.borrow();
    let position = frame
        .payload()
        .and_then(|sprites| sprites.get(sprite.index))
        .map(|sprite| sprite.position())
        .ok_or_else(|| BridgeError::Detached { index: sprite.index }.into_script_error())?;
    Ok((position.x as FLOAT, position.y as FLOAT))
}

pub fn register_sprite_api(engine: &mut Engine) {
    engine.register_type_with_name::<SpriteHandle>("Sprite");
    engine.register_fn("move", move_0);
    engine.register_fn("move", move_1);
    engine.register_fn("move", move_2);
    engine.register_fn("move", move_3);
    engine.register_fn("index", sprite_index);
    engine.register_fn("x", sprite_x);
    engine.register_fn("y", sprite_y);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_sync::{frame_channel, CancelToken};
    use crate::sprite::Sprite;
    use std::thread;

    #[test]
    fn handle_outside_a_frame_is_detached() {
        let (mut host, side) = frame_channel::<SpriteSet>(CancelToken::new());
        let frame: SharedFrame = Rc::new(RefCell::new(side));
        let handle = SpriteHandle::new(0, frame.clone());
        let args = [Dynamic::from_float(1.0), Dynamic::from_float(2.0)];

        assert_eq!(handle.call_move(&args).err(), Some(BridgeError::Detached { index: 0 }));

        let worker = thread::spawn(move || host.advance(0, vec![Sprite::new()]).ok().map(|done| done.payload));
        frame.borrow_mut().wait_for_next_frame().expect("frame 0");
        handle.call_move(&args).expect("move during the frame");
        assert_eq!(
            SpriteHandle::new(3, frame.clone()).call_move(&args).err(),
            Some(BridgeError::Detached { index: 3 }),
            "index past the sprite set"
        );
        frame.borrow_mut().finish().expect("finish");
        // The frame went back to the host, so the handle is detached again.
        assert_eq!(handle.call_move(&args).err(), Some(BridgeError::Detached { index: 0 }));

        let sprites = worker.join().expect("host thread").expect("frame returned");
        assert_eq!(sprites[0].position(), glam::DVec2::new(1.0, 2.0));
    }

    #[test]
    fn integers_widen_to_floats() {
        let mut sprite = Sprite::new();
        call_move(&mut sprite, &[Dynamic::from_int(3), Dynamic::from_float(4.5)]).expect("move");
        assert_eq!(sprite.position().x, 3.0);
        assert_eq!(sprite.position().y, 4.5);
    }

    #[test]
    fn script_error_carries_structured_fields() {
        let err = BridgeError::ArgumentType { name: "y".into(), expected: "float".into(), found: "string".into() }
            .into_script_error();
        let EvalAltResult::ErrorRuntime(value, _) = *err else { panic!("expected runtime error") };
        let map = value.try_cast::<Map>().expect("error value should be a map");
        assert_eq!(map.get("kind").map(|v| v.to_string()), Some("ArgumentType".to_string()));
        assert_eq!(map.get("name").map(|v| v.to_string()), Some("y".to_string()));
    }
}
