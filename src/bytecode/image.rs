//! Compiled-script snapshots.
//!
//! An [`Image`] is the instruction arena plus the function table, encoded
//! with `postcard`. Images are only meant to be read back by the same build
//! that wrote them; the format tag guards against obvious mismatches.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::bytecode::ir::{Executable, Function, Instruction, Operand};
use crate::runtime::memory::MemoryRef;

const FORMAT: &str = concat!("cinder-image/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("malformed image: {0}")]
    Encoding(#[from] postcard::Error),

    #[error("image was written by {found}, expected {expected}")]
    Format { found: String, expected: &'static str },

    #[error("image references instruction {0} outside the code")]
    DanglingPointer(usize),
}

#[derive(Debug, Serialize, Deserialize)]
struct Image {
    format: String,
    name: String,
    code: Vec<Instruction>,
    functions: Vec<Function>,
}

impl Executable {
    pub fn to_image(&self) -> Result<Vec<u8>, ImageError> {
        let image = Image {
            format: FORMAT.to_string(),
            name: self.name().to_string(),
            code: self.code.clone(),
            functions: self.functions.values().cloned().collect(),
        };
        Ok(postcard::to_allocvec(&image)?)
    }

    /// Rebuilds an executable against `shared`. Script memory starts empty,
    /// so `.init` has to run again.
    pub fn from_image(bytes: &[u8], shared: &MemoryRef) -> Result<Executable, ImageError> {
        let image: Image = postcard::from_bytes(bytes)?;
        if image.format != FORMAT {
            return Err(ImageError::Format {
                found: image.format,
                expected: FORMAT,
            });
        }

        let len = image.code.len();
        for ins in &image.code {
            for operand in ins.operands() {
                match operand {
                    Operand::InstructionPointer(id) if id.0 >= len => {
                        return Err(ImageError::DanglingPointer(id.0));
                    }
                    _ => {}
                }
            }
        }
        if let Some(function) = image.functions.iter().find(|f| f.entry.0 >= len) {
            return Err(ImageError::DanglingPointer(function.entry.0));
        }

        let functions: IndexMap<String, Function> = image
            .functions
            .into_iter()
            .map(|f| (f.name.clone(), f))
            .collect();
        Ok(Executable::from_parts(image.name, image.code, functions, shared))
    }
}
