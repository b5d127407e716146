//! Async adapter from a chunk stream to an entry stream.

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::VecDeque;

use crate::codec::StreamingParser;
use crate::error::Result;
use crate::model::CatalogEntry;

struct EntryState<S> {
    chunks: S,
    parser: StreamingParser,
    ready: VecDeque<CatalogEntry>,
    finished: bool,
}

/// Turn a stream of byte chunks into a stream of entries.
///
/// Entries are yielded as soon as the chunk completing them arrives. A chunk
/// error is yielded once and ends the stream; the partially buffered entry
/// is dropped, everything already yielded stays valid.
pub fn entry_stream<S, B>(chunks: S) -> BoxStream<'static, Result<CatalogEntry>>
where
    S: Stream<Item = Result<B>> + Unpin + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = EntryState {
        chunks,
        parser: StreamingParser::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(entry) = state.ready.pop_front() {
                return Some((Ok(entry), state));
            }
            if state.finished {
                return None;
            }
            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    let entries = state.parser.feed(chunk.as_ref());
                    state.ready.extend(entries);
                }
                Some(Err(e)) => {
                    log::warn!(
                        "chunk stream failed after {} bytes: {}",
                        state.parser.bytes_consumed(),
                        e
                    );
                    state.finished = true;
                    return Some((Err(e), state));
                }
                None => {
                    let entries = state.parser.finish();
                    state.ready.extend(entries);
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}
