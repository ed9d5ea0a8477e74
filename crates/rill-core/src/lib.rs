//! # rill-core
//!
//! Core tensor machinery for rill: shapes, layouts, the `Tensor<B>` type,
//! the `Backend` trait, and reverse-mode automatic differentiation.
//!
//! This crate is backend-agnostic. Concrete devices (e.g. the CPU backend in
//! `rill-cpu`) implement the [`backend::Backend`] trait; everything here is
//! written against that trait.

pub mod backend;
pub mod backprop;
pub mod dtype;
pub mod error;
pub mod layout;
pub mod op;
pub mod shape;
pub mod tensor;

pub use backprop::GradStore;
pub use dtype::{DType, WithDType};
pub use error::{Error, Result};
pub use layout::Layout;
pub use shape::Shape;
pub use tensor::Tensor;
