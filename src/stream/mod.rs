//! Framed response stream: encoding on the way out, reassembly on the way in

mod frame;
mod reassembler;

pub use frame::Frame;
pub use reassembler::Reassembler;
