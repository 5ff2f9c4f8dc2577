//! Host root and runtime services
//!
//! The root window and everything it hands out that is not part of the node
//! graph: timers, storage, message channels, the network collaborator and
//! the fingerprint-derived `navigator`/`screen`/`location`, plus the inert
//! canvas, audio and WebRTC stand-ins.

pub mod channel;
pub mod cookies;
pub mod media;
pub mod navigator;
pub mod network;
pub mod storage;
pub mod timers;
pub mod window;

pub use channel::{message_channel, MessagePort};
pub use cookies::{Cookie, CookieJar};
pub use navigator::UrlParts;
pub use network::{HttpRequest, HttpResponse, Network, NetworkContext, OfflineNetwork, XmlHttpRequest};
pub use storage::Storage;
pub use timers::{Callback, TaskQueue, TimerId};
pub use window::HostWindow;
