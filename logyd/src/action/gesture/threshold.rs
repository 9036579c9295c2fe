use crate::action::{Action, ActionContext};

/// Fires its action once per press as soon as the accumulated motion reaches
/// the threshold.
pub struct ThresholdGesture {
    threshold: i32,
    action: Action,
    axis: i32,
    executed: bool,
}

impl ThresholdGesture {
    pub fn new(threshold: i32, action: Action) -> Self {
        Self {
            threshold,
            action,
            axis: 0,
            executed: false,
        }
    }

    pub fn duplicate(&self, ctx: &ActionContext) -> Self {
        Self::new(self.threshold, self.action.duplicate(ctx))
    }

    /// Starts a new cycle. With `init_threshold`, the next move fires
    /// regardless of its size.
    pub fn press(&mut self, init_threshold: bool) {
        self.axis = if init_threshold { self.threshold } else { 0 };
        self.executed = false;
    }

    pub async fn move_by(&mut self, delta: i32) {
        self.axis = self.axis.saturating_add(delta);

        if !self.executed && self.axis >= self.threshold {
            self.executed = true;
            self.action.trigger().await;
        }
    }

    pub fn release(&mut self) {
        self.executed = false;
    }

    pub fn wheel_compatible(&self) -> bool {
        false
    }
}
