#![doc = include_str!("../README.md")]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]

//! Core of a dependency-driven, multi-threaded asset build pipeline:
//! discovery of source assets, a two-stage (primary/secondary) dependency
//! graph captured per conversion task, cycle-safe conversion through
//! plug-in converters, a content-addressable cache, and a named-pipe
//! protocol a running game client uses to request an asset be rebuilt.
//!
//! Two frontends sit on top of this crate: a batch builder that walks the
//! resource tree once and exits, and a JIT daemon that stays resident,
//! watches the resource tree for changes, and serves [`asset_client`]
//! requests over a pipe.

#[macro_use]
extern crate tracing;

pub mod error;

pub mod hash;
pub mod section;

pub mod dependency;
pub mod dependency_list;

pub mod cache;
pub mod config;
pub mod converter;
pub mod converter_guard;
pub mod rule;

pub mod task;
pub mod task_queue;

pub mod compiler;
pub mod discovery;
pub mod processor;
pub mod report;

#[cfg(feature = "asset-pipe")]
pub mod asset_client;
#[cfg(feature = "asset-pipe")]
pub mod jit;

pub mod cli;

pub use cache::Cache;
pub use compiler::{Compiler, CompilerHost, NullObserver, Observer};
pub use config::{CompilerConfig, ProjectPaths};
pub use converter::{Converter, ConverterFactory, ConverterFlags, ConverterInfo, ConverterPlugin, PluginLoader};
pub use dependency::Dependency;
pub use dependency_list::DependencyList;
pub use error::{AssetPipelineError, Result};
pub use rule::{ConversionDecision, ConversionRule, GenericConversionRule};
pub use task::{ConversionTask, TaskId, TaskStatus};
