//! Workspace-level tests exercising the compiler and runtime together.

pub mod pattern;

#[cfg(test)]
mod properties;
#[cfg(test)]
mod scenarios;
