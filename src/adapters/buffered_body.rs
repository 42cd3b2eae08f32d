use bytes::{Bytes, BytesMut};

use crate::ports::body_stream::{BodySink, BodySinkError, BodySinkResult};

/// In-memory body sink used when the whole message is rebuilt after interception
#[derive(Debug, Default)]
pub struct BufferedBody {
    chunks: Vec<Bytes>,
    ended: bool,
}

impl BufferedBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(Bytes::is_empty)
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }

    /// Concatenate everything written so far.
    pub fn to_bytes(&self) -> Bytes {
        match self.chunks.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            chunks => {
                let mut joined = BytesMut::with_capacity(self.len());
                for chunk in chunks {
                    joined.extend_from_slice(chunk);
                }
                joined.freeze()
            }
        }
    }
}

impl BodySink for BufferedBody {
    fn write(&mut self, chunk: Bytes) -> BodySinkResult<()> {
        if self.ended {
            return Err(BodySinkError::Closed);
        }
        self.chunks.push(chunk);
        Ok(())
    }

    fn end(&mut self) -> BodySinkResult<()> {
        if self.ended {
            return Err(BodySinkError::Closed);
        }
        self.ended = true;
        Ok(())
    }
}
