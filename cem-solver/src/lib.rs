#![warn(clippy::todo, unused_qualifications)]

pub mod axis;
pub mod error;
pub mod fdtd;
pub mod geometry;
pub mod grid;
pub mod material;
pub mod port;
pub mod runner;
pub mod scenario;
pub mod simulation;
pub mod source;
pub mod sparams;
pub mod viewer;
