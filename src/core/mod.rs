// src/core/mod.rs

pub mod cache;
pub mod config_resolver;
pub mod envlist;
pub mod errors;
pub mod factor_parser;
pub mod ini;
pub mod interpolator;
pub mod matcher;
pub mod paths;
pub mod plan_builder;
pub mod settings;
pub mod workspace;
