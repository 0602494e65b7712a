//! Injector policy: what an admitted object looks like, whether it should be
//! injected, and what gets injected.

#![forbid(unsafe_code)]

pub mod annotations;
mod assets;
pub mod config;
mod decision;
mod generator;
pub mod overrides;
mod target;

pub use assets::SidecarAssets;
pub use config::{ConfigError, InjectConfig};
pub use decision::{DecisionEngine, InjectionDecision, PolicyError, SkipReason};
pub use generator::{GenerateContext, GenerateError, SpecGenerator, TemplateGenerator};
pub use target::{InjectionTarget, NamespacePolicy, TargetError};
