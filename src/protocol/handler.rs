//! Request Handler
//!
//! Parses one already-framed request, invokes the store, and serializes the
//! response. The handler runs synchronously on the selector thread between
//! two buffer flips: the connection guarantees the reader holds exactly one
//! frame and the writer lands in an empty output buffer.
//!
//! Failure policy, from least to most severe:
//!
//! - Unknown store name, or a store operation failing with a categorized
//!   error: serialized as an error response (`i16 code | utf message`); the
//!   connection lives on.
//! - Unknown opcode or a torn frame: returned as [`HandlerError`]; the
//!   protocol stream is corrupt and the connection must close.
//!
//! The status word is written only once the success/failure branch is
//! chosen, so a response is never half success, half error.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::store::{ErrorCodeMapper, Store, StoreError, StoreRepository};
use crate::versioning::{VectorClock, Versioned};

use super::framer::{frame, FrameOutcome};
use super::wire::{opcode, WireError, WireReader, WireWriter};

/// Unrecoverable request failures; the connection closes on any of these.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The opcode is not in the protocol's table.
    #[error("unknown op code: {0:#04x}")]
    UnknownOpcode(u8),

    /// The framed bytes did not parse, or the response outgrew the output
    /// buffer.
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// A protocol's request handler, as the connection state machine sees it.
///
/// The acceptor picks the handler before a connection enters the state
/// machine; the state machine itself is protocol-agnostic and only needs
/// framing plus dispatch.
pub trait RequestHandler: Send + Sync {
    /// Measures whether `buf` starts with one complete request.
    fn is_complete(&self, buf: &[u8]) -> FrameOutcome;

    /// Consumes exactly one framed request from `reader` and writes exactly
    /// one response (success or error) into `writer`.
    fn handle(
        &self,
        reader: &mut WireReader<'_>,
        writer: &mut WireWriter<'_>,
    ) -> Result<(), HandlerError>;
}

/// The native binary protocol: GET / GET_ALL / PUT / DELETE against a
/// shared [`StoreRepository`].
pub struct NativeRequestHandler {
    repository: Arc<StoreRepository>,
    mapper: ErrorCodeMapper,
}

impl NativeRequestHandler {
    pub fn new(repository: Arc<StoreRepository>, mapper: ErrorCodeMapper) -> Self {
        Self { repository, mapper }
    }

    fn handle_get(
        &self,
        reader: &mut WireReader<'_>,
        writer: &mut WireWriter<'_>,
        store: &dyn Store,
    ) -> Result<(), HandlerError> {
        let key = reader.read_key()?;
        match store.get(&key) {
            Ok(values) => {
                writer.put_i16(0)?;
                writer.put_versioned_list(&values)?;
            }
            Err(e) => self.write_error(writer, &e)?,
        }
        Ok(())
    }

    fn handle_get_all(
        &self,
        reader: &mut WireReader<'_>,
        writer: &mut WireWriter<'_>,
        store: &dyn Store,
    ) -> Result<(), HandlerError> {
        let num_keys = read_count(reader)?;
        let mut keys = Vec::with_capacity(num_keys.min(1024));
        for _ in 0..num_keys {
            keys.push(reader.read_key()?);
        }

        match store.get_all(&keys) {
            Ok(results) => {
                writer.put_i16(0)?;
                writer.put_i32(results.len() as i32)?;
                for (key, values) in &results {
                    writer.put_key(key)?;
                    writer.put_versioned_list(values)?;
                }
            }
            Err(e) => self.write_error(writer, &e)?,
        }
        Ok(())
    }

    fn handle_put(
        &self,
        reader: &mut WireReader<'_>,
        writer: &mut WireWriter<'_>,
        store: &dyn Store,
    ) -> Result<(), HandlerError> {
        let key = reader.read_key()?;
        let blob = reader.read_blob()?;

        // The blob is clock_bytes || value_bytes; the clock's
        // self-describing size is the split point.
        let clock = match VectorClock::from_bytes(&blob) {
            Ok(clock) => clock,
            Err(e) => {
                let err = StoreError::InvalidMetadata(format!("bad version metadata: {e}"));
                return self.write_error(writer, &err);
            }
        };
        let value = blob.slice(clock.size_in_bytes()..);

        match store.put(key, Versioned::new(clock, value)) {
            Ok(()) => writer.put_i16(0)?,
            Err(e) => self.write_error(writer, &e)?,
        }
        Ok(())
    }

    fn handle_delete(
        &self,
        reader: &mut WireReader<'_>,
        writer: &mut WireWriter<'_>,
        store: &dyn Store,
    ) -> Result<(), HandlerError> {
        let key = reader.read_key()?;
        let version_size = reader.read_i16()?;
        if version_size < 0 {
            return Err(WireError::NegativeLength(version_size as i32).into());
        }
        let version_bytes = reader.read_bytes(version_size as usize)?;

        let version = match VectorClock::from_bytes(version_bytes) {
            Ok(version) => version,
            Err(e) => {
                let err = StoreError::InvalidMetadata(format!("bad version metadata: {e}"));
                return self.write_error(writer, &err);
            }
        };

        match store.delete(&key, &version) {
            Ok(deleted) => {
                writer.put_i16(0)?;
                writer.put_u8(u8::from(deleted))?;
            }
            Err(e) => self.write_error(writer, &e)?,
        }
        Ok(())
    }

    /// Serializes a categorized failure: `i16 code | utf message`.
    fn write_error(
        &self,
        writer: &mut WireWriter<'_>,
        error: &StoreError,
    ) -> Result<(), HandlerError> {
        let code = self.mapper.code(error);
        debug!(code, error = %error, "request failed");
        writer.put_i16(code)?;
        writer.put_utf(&error.to_string())?;
        Ok(())
    }
}

impl RequestHandler for NativeRequestHandler {
    fn is_complete(&self, buf: &[u8]) -> FrameOutcome {
        frame(buf)
    }

    fn handle(
        &self,
        reader: &mut WireReader<'_>,
        writer: &mut WireWriter<'_>,
    ) -> Result<(), HandlerError> {
        let op = reader.read_u8()?;
        let store_name = reader.read_utf()?.to_string();
        let routed = reader.read_u8()? != 0;

        let Some(store) = self.repository.get(&store_name, routed) else {
            let err = StoreError::unknown(format!("No store named '{store_name}'."));
            return self.write_error(writer, &err);
        };

        match op {
            opcode::GET => self.handle_get(reader, writer, store.as_ref()),
            opcode::GET_ALL => self.handle_get_all(reader, writer, store.as_ref()),
            opcode::PUT => self.handle_put(reader, writer, store.as_ref()),
            opcode::DELETE => self.handle_delete(reader, writer, store.as_ref()),
            other => Err(HandlerError::UnknownOpcode(other)),
        }
    }
}

fn read_count(reader: &mut WireReader<'_>) -> Result<usize, HandlerError> {
    let v = reader.read_i32()?;
    if v < 0 {
        return Err(WireError::NegativeLength(v).into());
    }
    Ok(v as usize)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bytes::Bytes;

    use super::*;
    use crate::buffer::ByteBuffer;
    use crate::store::MemoryStore;

    /// A store whose writes always fail with a categorized error.
    struct ReadOnlyStore(MemoryStore);

    impl Store for ReadOnlyStore {
        fn name(&self) -> &str {
            self.0.name()
        }
        fn get(&self, key: &Bytes) -> Result<Vec<Versioned>, StoreError> {
            self.0.get(key)
        }
        fn get_all(&self, keys: &[Bytes]) -> Result<HashMap<Bytes, Vec<Versioned>>, StoreError> {
            self.0.get_all(keys)
        }
        fn put(&self, _key: Bytes, _value: Versioned) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("store offline".to_string()))
        }
        fn delete(&self, _key: &Bytes, _version: &VectorClock) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("store offline".to_string()))
        }
    }

    fn handler_with_store(store: Arc<dyn Store>) -> NativeRequestHandler {
        let repository = Arc::new(StoreRepository::new());
        repository.add_local(store);
        NativeRequestHandler::new(repository, ErrorCodeMapper::new())
    }

    fn handler_with_memory() -> (NativeRequestHandler, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new("s"));
        let handler = handler_with_store(Arc::clone(&store) as Arc<dyn Store>);
        (handler, store)
    }

    fn run(handler: &NativeRequestHandler, request: &[u8]) -> Result<Vec<u8>, HandlerError> {
        assert_eq!(
            handler.is_complete(request),
            FrameOutcome::Complete(request.len())
        );
        let mut output = ByteBuffer::with_capacity(64_000);
        let mut reader = WireReader::new(request);
        let mut writer = WireWriter::new(&mut output);
        handler.handle(&mut reader, &mut writer)?;
        Ok(output.filled().to_vec())
    }

    fn request(op: u8, store: &str, payload: &[u8]) -> Vec<u8> {
        let mut buf = ByteBuffer::with_capacity(4096);
        let mut writer = WireWriter::new(&mut buf);
        writer.put_u8(op).unwrap();
        writer.put_utf(store).unwrap();
        writer.put_u8(0).unwrap();
        writer.put_bytes(payload).unwrap();
        buf.filled().to_vec()
    }

    #[test]
    fn test_get_against_empty_store() {
        let (handler, _) = handler_with_memory();
        let req = request(opcode::GET, "s", &[0, 0, 0, 3, b'k', b'e', b'y']);
        // Zero status, zero-length versioned list.
        assert_eq!(run(&handler, &req).unwrap(), [0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_unknown_store_is_an_error_response() {
        let (handler, _) = handler_with_memory();
        let req = request(opcode::GET, "absent", &[0, 0, 0, 3, b'k', b'e', b'y']);
        let response = run(&handler, &req).unwrap();

        let mut reader = WireReader::new(&response);
        assert_eq!(reader.read_i16().unwrap(), 1);
        assert_eq!(reader.read_utf().unwrap(), "No store named 'absent'.");
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_put_then_get_roundtrip() {
        let (handler, store) = handler_with_memory();

        // dataSize 6: 3-byte clock {node 255: 0} followed by "ABC".
        let mut payload = vec![0, 0, 0, 3, b'k', b'e', b'y'];
        payload.extend_from_slice(&[0, 0, 0, 6, 0x00, 0x01, 0xFF, b'A', b'B', b'C']);
        let put = request(opcode::PUT, "s", &payload);
        assert_eq!(run(&handler, &put).unwrap(), [0, 0]);

        let stored = store.get(&Bytes::from_static(b"key")).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].value().as_ref(), b"ABC");
        assert_eq!(stored[0].clock().size_in_bytes(), 3);

        let get = request(opcode::GET, "s", &[0, 0, 0, 3, b'k', b'e', b'y']);
        let response = run(&handler, &get).unwrap();

        let mut reader = WireReader::new(&response);
        assert_eq!(reader.read_i16().unwrap(), 0);
        let values = reader.read_versioned_list().unwrap();
        assert_eq!(values, stored);
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_delete_reports_whether_anything_went() {
        let (handler, _) = handler_with_memory();

        let mut payload = vec![0, 0, 0, 3, b'k', b'e', b'y'];
        payload.extend_from_slice(&[0, 0, 0, 6, 0x00, 0x01, 0xFF, b'A', b'B', b'C']);
        run(&handler, &request(opcode::PUT, "s", &payload)).unwrap();

        let mut del_payload = vec![0, 0, 0, 3, b'k', b'e', b'y'];
        del_payload.extend_from_slice(&[0x00, 0x03, 0x00, 0x01, 0xFF]);
        let del = request(opcode::DELETE, "s", &del_payload);

        assert_eq!(run(&handler, &del).unwrap(), [0, 0, 1]);
        // Nothing left to delete the second time around.
        assert_eq!(run(&handler, &del).unwrap(), [0, 0, 0]);
    }

    #[test]
    fn test_get_all_lists_each_present_key_once() {
        let (handler, store) = handler_with_memory();
        let mut clock = VectorClock::new();
        clock.increment(1);
        store
            .put(
                Bytes::from_static(b"a"),
                Versioned::new(clock, Bytes::from_static(b"va")),
            )
            .unwrap();

        let mut payload = vec![0, 0, 0, 2];
        payload.extend_from_slice(&[0, 0, 0, 1, b'a']);
        payload.extend_from_slice(&[0, 0, 0, 1, b'b']);
        let response = run(&handler, &request(opcode::GET_ALL, "s", &payload)).unwrap();

        let mut reader = WireReader::new(&response);
        assert_eq!(reader.read_i16().unwrap(), 0);
        assert_eq!(reader.read_i32().unwrap(), 1);
        assert_eq!(reader.read_key().unwrap().as_ref(), b"a");
        let values = reader.read_versioned_list().unwrap();
        assert_eq!(values[0].value().as_ref(), b"va");
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_store_failure_is_one_error_response() {
        let handler =
            handler_with_store(Arc::new(ReadOnlyStore(MemoryStore::new("s"))) as Arc<dyn Store>);

        let mut payload = vec![0, 0, 0, 3, b'k', b'e', b'y'];
        payload.extend_from_slice(&[0, 0, 0, 6, 0x00, 0x01, 0xFF, b'A', b'B', b'C']);
        let response = run(&handler, &request(opcode::PUT, "s", &payload)).unwrap();

        let mut reader = WireReader::new(&response);
        assert_eq!(reader.read_i16().unwrap(), 2); // unavailable
        assert_eq!(reader.read_utf().unwrap(), "store offline");
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_garbage_clock_is_invalid_metadata_not_a_teardown() {
        let (handler, _) = handler_with_memory();

        // Clock width byte 0x09 is out of range.
        let mut payload = vec![0, 0, 0, 3, b'k', b'e', b'y'];
        payload.extend_from_slice(&[0, 0, 0, 3, 0x09, 0x00, 0x00]);
        let response = run(&handler, &request(opcode::PUT, "s", &payload)).unwrap();

        let mut reader = WireReader::new(&response);
        assert_eq!(reader.read_i16().unwrap(), 4); // invalid metadata
        assert!(reader.read_utf().unwrap().starts_with("bad version metadata"));
    }

    #[test]
    fn test_unknown_opcode_is_fatal() {
        let (handler, _) = handler_with_memory();
        let req = request(0x7F, "s", &[]);
        assert!(matches!(
            run(&handler, &req).unwrap_err(),
            HandlerError::UnknownOpcode(0x7F)
        ));
    }

    #[test]
    fn test_obsolete_put_keeps_the_connection_usable() {
        let (handler, store) = handler_with_memory();
        let mut newer = VectorClock::new();
        newer.increment(1);
        newer.increment(1);
        store
            .put(
                Bytes::from_static(b"key"),
                Versioned::new(newer, Bytes::from_static(b"cur")),
            )
            .unwrap();

        // A put stamped with the older clock {1:1}.
        let clock_bytes = {
            let mut c = VectorClock::new();
            c.increment(1);
            c.to_bytes()
        };
        let mut payload = vec![0, 0, 0, 3, b'k', b'e', b'y'];
        payload.extend_from_slice(&((clock_bytes.len() + 5) as i32).to_be_bytes());
        payload.extend_from_slice(&clock_bytes);
        payload.extend_from_slice(b"stale");
        let response = run(&handler, &request(opcode::PUT, "s", &payload)).unwrap();

        let mut reader = WireReader::new(&response);
        assert_eq!(reader.read_i16().unwrap(), 3); // obsolete version
    }
}
