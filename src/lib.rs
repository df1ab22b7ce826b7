#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod cli;
pub mod cloudinit;
pub mod config;
pub mod deploy;
pub mod error;
pub mod exec;
pub mod image;
pub mod init;
pub mod paths;
pub mod provision;
pub mod starter;
