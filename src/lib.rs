#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod bridge;
pub mod errors;
pub mod native;
pub mod nif;
pub mod registry;
pub mod scheduler;
pub mod settings;
pub mod usage;

pub use bridge::{Bridge, ResourceInfo, ResourceTags, TextureWrapper};
pub use errors::{BridgeError, Result};
pub use native::NativeApi;
pub use native::mock::{MockNative, MockStats, Resolution};
pub use nif::{NifModule, Term};
pub use registry::{Registry, ResourceHandle, ResourceId};
pub use settings::{AdapterOptions, BridgeSettings, PowerPreference};
pub use usage::BufferUsage;

#[cfg(feature = "wgpu")]
pub use native::wgpu_backend::WgpuNative;
