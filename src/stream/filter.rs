use std::collections::HashSet;

use crate::KStream;
use crate::error::{BoxError, StreamError};
use crate::stream::{Record, StreamItem};

/// Drops records for which `filt` returns false.
///
/// When `topics` is set only records read from those topics are tested, everything else
/// passes through untouched. The predicate sees the whole record, tombstones included,
/// and decides on its own what to do with them. A predicate error ends the stream.
pub struct Filter<S, F>
    where S: KStream
{
    pub(crate) stream: S,
    pub(crate) topics: Option<HashSet<String>>,
    pub(crate) filt: F,
}

impl<S: KStream, F> Filter<S, F> {
    fn applies_to(&self, topic: &str) -> bool {
        self.topics.as_ref().map_or(true, |t| t.contains(topic))
    }
}

#[async_trait(?Send)]
impl<S, F, E> KStream for Filter<S, F>
    where S: KStream,
          F: Fn(&Record<S::Key, S::Value>) -> Result<bool, E>,
          E: Into<BoxError> + 'static
{
    type Key = S::Key;
    type Value = S::Value;

    async fn next(&mut self) -> Result<StreamItem<Self::Key, Self::Value>, StreamError> {
        loop {
            match self.stream.next().await? {
                StreamItem::Item(rec) => {
                    if !self.applies_to(&rec.topic) {
                        return Ok(StreamItem::Item(rec));
                    }
                    let keep = (self.filt)(&rec).map_err(|e| StreamError::Decode {
                        topic: rec.topic.clone(),
                        partition: rec.partition,
                        offset: rec.offset,
                        source: e.into(),
                    })?;
                    if keep {
                        return Ok(StreamItem::Item(rec));
                    }
                    trace!("Dropping {}[{}]@{}", rec.topic, rec.partition, rec.offset);
                }

                x => return Ok(x),
            };
        }
    }

    fn has_pending(&self) -> bool {
        self.stream.has_pending()
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.stream.close().await
    }
}
