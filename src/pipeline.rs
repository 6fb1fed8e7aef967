//! Streaming label aggregation
//!
//! Producers scan the spatial index and emit one chunk per matching entry,
//! in label-sorted order, into a bounded channel. The pipeline groups
//! contiguous same-label chunks and finalizes the consumer once per label
//! run. Contiguity is the producer's contract: all chunks for a label must
//! arrive back to back. The pipeline does not re-validate this (doing so
//! would require buffering the whole stream); a violation produces several
//! incomplete finalize calls for that label.

use crate::error::{LabelvolError, Result};
use crate::keys::{parse_spatial_index_key, spatial_index_full_range};
use crate::store::{OrderedKvStore, VersionedContext};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One spatial-index entry tagged with its label.
#[derive(Debug, Clone)]
pub struct LabelChunk {
    pub label: u64,
    pub body: Bytes,
}

/// Message on an aggregation stream.
///
/// End-of-stream is a tagged variant rather than an in-band value: label 0
/// is a real label and cannot double as a terminator. Channel closure is
/// treated as `End` as well.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    Chunk(LabelChunk),
    End,
}

/// Consumer of contiguous same-label chunk groups.
#[async_trait]
pub trait LabelConsumer: Send {
    /// A new label group starts; reset accumulation state.
    fn begin(&mut self, label: u64);

    /// Feed one chunk of the current group into the accumulator.
    fn absorb(&mut self, chunk: &LabelChunk) -> Result<()>;

    /// The current group is complete; derive and persist its result.
    async fn finalize(&mut self) -> Result<()>;

    /// The stream has ended and the last group (if any) was finalized.
    async fn end_of_stream(&mut self) -> Result<()>;
}

enum PipelineState {
    Idle,
    Accumulating(u64),
    Terminal,
}

/// Groups a label-ordered chunk stream and drives a [`LabelConsumer`].
pub struct LabelAggregationPipeline<C: LabelConsumer> {
    consumer: C,
    state: PipelineState,
}

impl<C: LabelConsumer> LabelAggregationPipeline<C> {
    pub fn new(consumer: C) -> Self {
        Self {
            consumer,
            state: PipelineState::Idle,
        }
    }

    /// Drain the channel until an `End` message (or closure), finalizing once
    /// per contiguous label group. Returns the consumer for inspection.
    pub async fn run(mut self, mut rx: mpsc::Receiver<StreamMessage>) -> Result<C> {
        loop {
            let msg = rx.recv().await.unwrap_or(StreamMessage::End);
            match msg {
                StreamMessage::Chunk(chunk) => self.feed(&chunk).await?,
                StreamMessage::End => {
                    self.finish().await?;
                    return Ok(self.consumer);
                }
            }
        }
    }

    async fn feed(&mut self, chunk: &LabelChunk) -> Result<()> {
        match self.state {
            PipelineState::Terminal => Err(LabelvolError::Store(
                "chunk received after end of stream".to_string(),
            )),
            // Label 0 is always a boundary, even when repeated.
            PipelineState::Accumulating(current)
                if chunk.label == current && chunk.label != 0 =>
            {
                self.consumer.absorb(chunk)
            }
            PipelineState::Accumulating(_) => {
                self.consumer.finalize().await?;
                self.start_group(chunk)
            }
            PipelineState::Idle => self.start_group(chunk),
        }
    }

    fn start_group(&mut self, chunk: &LabelChunk) -> Result<()> {
        self.consumer.begin(chunk.label);
        self.state = PipelineState::Accumulating(chunk.label);
        self.consumer.absorb(chunk)
    }

    async fn finish(&mut self) -> Result<()> {
        if let PipelineState::Accumulating(_) = self.state {
            self.consumer.finalize().await?;
        }
        self.state = PipelineState::Terminal;
        self.consumer.end_of_stream().await
    }
}

/// Stream every spatial index entry, in (label, block) key order, into `tx`,
/// then send the end-of-stream sentinel.
///
/// The key order of the spatial index is what guarantees the per-label
/// contiguity the pipeline requires, so this producer drives a single
/// ordered scan rather than a parallel fan-in.
pub async fn stream_spatial_index(
    store: Arc<dyn OrderedKvStore>,
    ctx: VersionedContext,
    tx: mpsc::Sender<StreamMessage>,
) -> Result<()> {
    let (first, last) = spatial_index_full_range();
    let mut chunks = store.scan_range(&ctx, &first, &last).await?;
    while let Some(chunk) = chunks.next().await {
        let (label, _block) = parse_spatial_index_key(&chunk.key)?;
        let msg = StreamMessage::Chunk(LabelChunk {
            label,
            body: chunk.value,
        });
        if tx.send(msg).await.is_err() {
            return Err(LabelvolError::Store(
                "aggregation consumer hung up mid-scan".to_string(),
            ));
        }
    }
    let _ = tx.send(StreamMessage::End).await;
    Ok(())
}
