//! Payload preparation: smashing and chunk sizing. No I/O.

use std::path::Path;

use tracing::{debug, warn};

use replup_smash::{SmashLevel, transform};

use crate::types::{Candidate, TransferTask};

/// Turns file content into a [`TransferTask`].
///
/// Only `.py` files are smashed; everything else is sent byte for byte.
#[derive(Debug, Clone, Copy)]
pub struct Preparer {
    smash: Option<SmashLevel>,
    chunk_size: usize,
}

impl Preparer {
    pub fn new(smash: Option<SmashLevel>, chunk_size: usize) -> Self {
        Self {
            smash,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn prepare(&self, candidate: &Candidate, content: Vec<u8>) -> TransferTask {
        TransferTask {
            local: candidate.local.clone(),
            remote: candidate.remote.clone(),
            payload: self.payload(&candidate.remote, content),
            chunk_size: self.chunk_size,
        }
    }

    fn payload(&self, remote: &str, content: Vec<u8>) -> Vec<u8> {
        let Some(level) = self.smash.filter(|_| is_python(remote)) else {
            return content;
        };
        match String::from_utf8(content) {
            Ok(text) => {
                let smashed = transform(&text, level);
                debug!(
                    path = remote,
                    %level,
                    before = text.len(),
                    after = smashed.len(),
                    "smashed"
                );
                smashed.into_bytes()
            }
            Err(err) => {
                warn!(path = remote, "not valid UTF-8, sending unchanged");
                err.into_bytes()
            }
        }
    }
}

fn is_python(remote: &str) -> bool {
    Path::new(remote)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("py"))
}
