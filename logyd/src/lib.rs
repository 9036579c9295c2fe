//! Remaps buttons, gestures and the thumbwheel of Logitech HID++2.0 devices
//! to synthetic input events.
//!
//! A [`device::ManagedDevice`] diverts the controls named in the
//! [`config::Config`] and drives the [`action::Action`]s bound to them, which
//! emit events through an [`sink::InputSink`].

pub mod action;
pub mod async_hid_impl;
pub mod cli;
pub mod config;
pub mod device;
pub mod sink;
