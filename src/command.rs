//! Command buffers.
//!
//! The application thread records commands against the shadow state and
//! submits whole buffers; the render thread replays them against the
//! backend in submission order. Commands carry data, never backend
//! handles obtained on the wrong thread.

use crate::backend::{BufferId, TextureId};
use crate::d3d8::{ClearFlags, Dword, PrimitiveType};

#[derive(Clone, Debug)]
pub enum Command {
    Clear {
        flags: ClearFlags,
        color: Dword,
        z: f32,
        stencil: Dword,
    },
    DrawPrimitive {
        primitive_type: PrimitiveType,
        start_vertex: u32,
        primitive_count: u32,
    },
    DrawIndexedPrimitive {
        primitive_type: PrimitiveType,
        base_vertex: i32,
        start_index: u32,
        primitive_count: u32,
    },
    /// Draw from user memory; the vertex payload travels with the command.
    DrawPrimitiveUp {
        primitive_type: PrimitiveType,
        primitive_count: u32,
        vertex_data: Vec<u8>,
        stride: u32,
    },
    Present,
    /// GPU-object destruction is deferred here because only the render
    /// thread owns the context.
    DestroyTexture(TextureId),
    DestroyBuffer(BufferId),
}

impl Command {
    fn payload_bytes(&self) -> usize {
        match self {
            Command::DrawPrimitiveUp { vertex_data, .. } => vertex_data.len(),
            _ => 0,
        }
    }
}

#[derive(Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
}

impl CommandBuffer {
    pub fn new() -> CommandBuffer {
        CommandBuffer {
            commands: Vec::new(),
        }
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Approximate size, for queue diagnostics.
    pub fn byte_size(&self) -> usize {
        self.commands.len() * std::mem::size_of::<Command>()
            + self.commands.iter().map(Command::payload_bytes).sum::<usize>()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_size_includes_payloads() {
        let mut buffer = CommandBuffer::new();
        assert!(buffer.is_empty());
        buffer.push(Command::Present);
        buffer.push(Command::DrawPrimitiveUp {
            primitive_type: PrimitiveType::TriangleList,
            primitive_count: 1,
            vertex_data: vec![0u8; 96],
            stride: 32,
        });
        assert_eq!(buffer.command_count(), 2);
        assert!(buffer.byte_size() >= 96);
    }
}
