//! Fan-out of one audio stream to several concurrent consumers.
//!
//! Every chunk read from the source is delivered, in arrival order, to every
//! branch. Branches buffer independently: a slow consumer only stalls the
//! relay once its own buffer is full, and no chunk is ever dropped for the
//! faster branches. Cancellation or source end-of-stream closes all branches
//! promptly.

use crate::audio::AudioChunk;
use futures_util::future::join_all;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Per-branch buffer depth. Bounded so a stuck consumer cannot grow memory
/// without limit.
const BRANCH_BUFFER_CHUNKS: usize = 64;

pub struct StreamSplitter;

impl StreamSplitter {
    /// Split `source` into `branch_count` independent chunk streams.
    ///
    /// The relay task runs until the source ends or `cancel` fires, then
    /// drops every sender so all branches observe end-of-stream exactly once.
    pub fn split<S>(
        source: S,
        branch_count: usize,
        cancel: CancellationToken,
    ) -> Vec<ReceiverStream<AudioChunk>>
    where
        S: Stream<Item = AudioChunk> + Send + Unpin + 'static,
    {
        assert!(branch_count >= 1, "splitter needs at least one branch");

        let mut senders = Vec::with_capacity(branch_count);
        let mut branches = Vec::with_capacity(branch_count);
        for _ in 0..branch_count {
            let (tx, rx) = mpsc::channel::<AudioChunk>(BRANCH_BUFFER_CHUNKS);
            senders.push(tx);
            branches.push(ReceiverStream::new(rx));
        }

        tokio::spawn(Self::relay(source, senders, cancel));

        branches
    }

    async fn relay<S>(mut source: S, senders: Vec<mpsc::Sender<AudioChunk>>, cancel: CancellationToken)
    where
        S: Stream<Item = AudioChunk> + Send + Unpin + 'static,
    {
        let mut delivered: u64 = 0;
        loop {
            let chunk = tokio::select! {
                maybe = source.next() => match maybe {
                    Some(chunk) => chunk,
                    None => {
                        log::debug!("Splitter: source ended after {} chunks", delivered);
                        break;
                    }
                },
                _ = cancel.cancelled() => {
                    log::info!("Splitter: cancelled after {} chunks", delivered);
                    break;
                }
            };

            // Deliver to every branch concurrently. A closed branch (consumer
            // dropped its stream) is skipped without disturbing the others.
            let sends = senders
                .iter()
                .map(|tx| tx.send(chunk.clone()))
                .collect::<Vec<_>>();
            for result in join_all(sends).await {
                if result.is_err() {
                    log::debug!("Splitter: branch consumer dropped, skipping it");
                }
            }
            delivered += 1;
        }
        // Senders drop here; every branch sees end-of-stream.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::wrappers::ReceiverStream as TestStream;

    fn chunk(value: i16) -> AudioChunk {
        AudioChunk::new(vec![value; 480])
    }

    fn source_of(values: &[i16]) -> TestStream<AudioChunk> {
        let (tx, rx) = mpsc::channel(values.len().max(1));
        for &v in values {
            tx.try_send(chunk(v)).unwrap();
        }
        drop(tx);
        TestStream::new(rx)
    }

    async fn collect_firsts(mut branch: ReceiverStream<AudioChunk>) -> Vec<i16> {
        let mut out = Vec::new();
        while let Some(c) = branch.next().await {
            out.push(c.samples[0]);
        }
        out
    }

    #[tokio::test]
    async fn test_every_branch_sees_same_ordered_sequence() {
        let source = source_of(&[1, 2, 3, 4, 5]);
        let branches = StreamSplitter::split(source, 3, CancellationToken::new());

        for branch in branches {
            let seen = collect_firsts(branch).await;
            assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        }
    }

    #[tokio::test]
    async fn test_single_branch_passthrough() {
        let source = source_of(&[7, 8]);
        let mut branches = StreamSplitter::split(source, 1, CancellationToken::new());
        let seen = collect_firsts(branches.pop().unwrap()).await;
        assert_eq!(seen, vec![7, 8]);
    }

    #[tokio::test]
    async fn test_branches_observe_end_of_stream() {
        let source = source_of(&[]);
        let branches = StreamSplitter::split(source, 2, CancellationToken::new());
        for mut branch in branches {
            assert!(branch.next().await.is_none());
        }
    }

    #[tokio::test]
    async fn test_slow_branch_does_not_drop_chunks() {
        let values: Vec<i16> = (0..20).collect();
        let source = source_of(&values);
        let mut branches = StreamSplitter::split(source, 2, CancellationToken::new());
        let slow = branches.pop().unwrap();
        let fast = branches.pop().unwrap();

        // Drain the fast branch first, then the slow one; both must see all.
        let fast_seen = collect_firsts(fast).await;
        let slow_seen = collect_firsts(slow).await;
        assert_eq!(fast_seen, values);
        assert_eq!(slow_seen, values);
    }

    #[tokio::test]
    async fn test_cancellation_closes_all_branches() {
        // A source that never ends on its own.
        let (tx, rx) = mpsc::channel::<AudioChunk>(4);
        let cancel = CancellationToken::new();
        let branches = StreamSplitter::split(TestStream::new(rx), 2, cancel.clone());

        tx.send(chunk(1)).await.unwrap();
        cancel.cancel();

        for mut branch in branches {
            // Branch may or may not see the in-flight chunk, but must end.
            let ended = tokio::time::timeout(std::time::Duration::from_secs(1), async {
                while branch.next().await.is_some() {}
            })
            .await;
            assert!(ended.is_ok(), "branch did not observe end-of-stream");
        }
    }

    #[tokio::test]
    async fn test_dropped_branch_does_not_stall_others() {
        let values: Vec<i16> = (0..100).collect();
        let source = source_of(&values);
        let mut branches = StreamSplitter::split(source, 2, CancellationToken::new());
        let survivor = branches.pop().unwrap();
        drop(branches.pop().unwrap());

        let seen = collect_firsts(survivor).await;
        assert_eq!(seen, values);
    }
}
