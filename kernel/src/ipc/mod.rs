//! Inter-process communication primitives owned by the core

pub mod pipe;

pub use pipe::Pipe;
