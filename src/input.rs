use std::collections::HashSet;

use glam::Vec3;
use winit::event::{ElementState, MouseButton, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

/// Which kind of device produced an input event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InputDevice {
    Keyboard,
    Mouse,
}

/// A single key or button.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Control {
    Key(KeyCode),
    Mouse(MouseButton),
}

impl Control {
    pub fn device(self) -> InputDevice {
        match self {
            Control::Key(_) => InputDevice::Keyboard,
            Control::Mouse(_) => InputDevice::Mouse,
        }
    }
}

/// Movement keys in axis order: negative then positive for x, y, z.
const MOVEMENT: [KeyCode; 6] = [
    KeyCode::KeyA,
    KeyCode::KeyD,
    KeyCode::KeyQ,
    KeyCode::KeyE,
    KeyCode::KeyW,
    KeyCode::KeyS,
];

/// What the caller should do with an event after [`InputState::apply`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Routed {
    /// The overlay visibility flag should be flipped.
    pub toggle_overlay: bool,
    /// The event was not used and should go to the scene.
    pub forward_to_scene: bool,
}

/// Tracks held keys and the camera movement direction.
#[derive(Debug, Default)]
pub struct InputState {
    keys_down: HashSet<KeyCode>,
    /// Movement keys whose press reached the camera.
    moving: HashSet<KeyCode>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes one control change.
    ///
    /// F1 toggles the overlay on release. Movement keys adjust the direction
    /// unless the overlay consumed the press. Other keyboard events go to
    /// the scene when the overlay did not consume them.
    pub fn apply(&mut self, control: Control, active: bool, consumed_by_overlay: bool) -> Routed {
        let mut routed = Routed {
            toggle_overlay: control == Control::Key(KeyCode::F1) && !active,
            forward_to_scene: false,
        };

        let Control::Key(key) = control else {
            return routed;
        };

        if active {
            self.keys_down.insert(key);
        } else {
            self.keys_down.remove(&key);
        }

        if !MOVEMENT.contains(&key) {
            routed.forward_to_scene = !consumed_by_overlay;
            return routed;
        }
        // A press the overlay consumed never moves the camera, so its
        // release has nothing to undo.
        if !active {
            self.moving.remove(&key);
        } else if !consumed_by_overlay {
            self.moving.insert(key);
        }
        routed
    }

    /// View-space movement direction from the held movement keys. Opposite
    /// keys held together cancel out.
    pub fn direction(&self) -> Vec3 {
        let mut direction = Vec3::ZERO;
        for (index, key) in MOVEMENT.iter().enumerate() {
            if self.moving.contains(key) {
                direction[index >> 1] += if index & 1 == 1 { 1.0 } else { -1.0 };
            }
        }
        direction
    }

    pub fn key_down(&self, key: KeyCode) -> bool {
        self.keys_down.contains(&key)
    }

    /// Ctrl and Shift each double the movement speed.
    pub fn speed_multiplier(&self) -> f32 {
        let ctrl = self.key_down(KeyCode::ControlLeft) || self.key_down(KeyCode::ControlRight);
        let shift = self.key_down(KeyCode::ShiftLeft) || self.key_down(KeyCode::ShiftRight);
        let mut multiplier = 1.0;
        if ctrl {
            multiplier *= 2.0;
        }
        if shift {
            multiplier *= 2.0;
        }
        multiplier
    }
}

/// Converts a winit event into a control change, if it is one.
pub fn control_event(event: &WindowEvent) -> Option<(Control, bool)> {
    match event {
        WindowEvent::KeyboardInput { event, .. } => {
            if event.repeat {
                return None;
            }
            let PhysicalKey::Code(key) = event.physical_key else {
                return None;
            };
            Some((Control::Key(key), event.state == ElementState::Pressed))
        }
        WindowEvent::MouseInput { state, button, .. } => {
            Some((Control::Mouse(*button), *state == ElementState::Pressed))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: KeyCode) -> Control {
        Control::Key(k)
    }

    #[test]
    fn movement_axes() {
        let mut input = InputState::new();
        input.apply(key(KeyCode::KeyD), true, false);
        input.apply(key(KeyCode::KeyQ), true, false);
        input.apply(key(KeyCode::KeyW), true, false);
        assert_eq!(input.direction(), Vec3::new(1.0, -1.0, -1.0));
        input.apply(key(KeyCode::KeyD), false, false);
        input.apply(key(KeyCode::KeyQ), false, false);
        input.apply(key(KeyCode::KeyW), false, false);
        assert_eq!(input.direction(), Vec3::ZERO);
    }

    #[test]
    fn opposite_keys_cancel_and_recover() {
        let mut input = InputState::new();
        input.apply(key(KeyCode::KeyA), true, false);
        input.apply(key(KeyCode::KeyD), true, false);
        assert_eq!(input.direction().x, 0.0);
        input.apply(key(KeyCode::KeyA), false, false);
        assert_eq!(input.direction().x, 1.0);
        input.apply(key(KeyCode::KeyD), false, false);
        assert_eq!(input.direction(), Vec3::ZERO);
    }

    #[test]
    fn repeated_presses_count_once() {
        let mut input = InputState::new();
        input.apply(key(KeyCode::KeyW), true, false);
        input.apply(key(KeyCode::KeyW), true, false);
        assert_eq!(input.direction(), Vec3::new(0.0, 0.0, -1.0));
        input.apply(key(KeyCode::KeyW), false, false);
        assert_eq!(input.direction(), Vec3::ZERO);
    }

    #[test]
    fn f1_release_toggles_overlay() {
        let mut input = InputState::new();
        assert!(!input.apply(key(KeyCode::F1), true, false).toggle_overlay);
        assert!(input.apply(key(KeyCode::F1), false, false).toggle_overlay);
    }

    #[test]
    fn consumed_press_does_not_move() {
        let mut input = InputState::new();
        input.apply(key(KeyCode::KeyA), true, true);
        assert_eq!(input.direction(), Vec3::ZERO);
        input.apply(key(KeyCode::KeyA), false, false);
        assert_eq!(input.direction(), Vec3::ZERO);
    }

    #[test]
    fn unmapped_keys_go_to_scene_unless_consumed() {
        let mut input = InputState::new();
        assert!(input.apply(key(KeyCode::KeyR), true, false).forward_to_scene);
        assert!(!input.apply(key(KeyCode::KeyR), false, true).forward_to_scene);
        assert!(!input.apply(key(KeyCode::KeyW), true, false).forward_to_scene);
    }

    #[test]
    fn modifiers_double_speed() {
        let mut input = InputState::new();
        assert_eq!(input.speed_multiplier(), 1.0);
        input.apply(key(KeyCode::ControlLeft), true, false);
        assert_eq!(input.speed_multiplier(), 2.0);
        input.apply(key(KeyCode::ShiftRight), true, false);
        assert_eq!(input.speed_multiplier(), 4.0);
    }
}
