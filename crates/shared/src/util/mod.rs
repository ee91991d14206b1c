// Utility types shared by the terrain and pathfinding crates

pub mod byte_buffer;

pub use byte_buffer::ByteBuffer;
