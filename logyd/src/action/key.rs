use std::sync::Arc;

use tracing::warn;

use crate::sink::{EV_KEY, InputSink};

/// Presses a list of keys while the button is held.
pub struct KeyAction {
    keys: Vec<u16>,
    sink: Arc<dyn InputSink>,
}

impl KeyAction {
    pub fn new(keys: Vec<u16>, sink: Arc<dyn InputSink>) -> Self {
        Self {
            keys,
            sink,
        }
    }

    pub fn keys(&self) -> &[u16] {
        &self.keys
    }

    pub fn press(&self) {
        self.send(1);
    }

    pub fn release(&self) {
        self.send(0);
    }

    fn send(&self, value: i32) {
        for &key in &self.keys {
            if let Err(err) = self.sink.send_event(EV_KEY, key, value) {
                warn!(key, value, "could not emit key event: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testing::{Recorded, RecordingSink};

    #[test]
    fn keys_are_sent_in_order() {
        let sink = RecordingSink::new();
        let action = KeyAction::new(vec![29, 30], sink.clone());

        action.press();
        action.release();

        let key = |code, value| Recorded::Event {
            event_type: EV_KEY,
            code,
            value,
        };
        assert_eq!(sink.take(), vec![key(29, 1), key(30, 1), key(29, 0), key(30, 0)]);
    }
}
