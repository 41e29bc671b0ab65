// crates/server/src/jobs/broadcaster.rs
//! In-process fan-out of job events to live subscribers.
//!
//! Each job gets its own bounded `tokio::sync::broadcast` channel.
//! Publishing never blocks and never fails the publisher: a subscriber
//! that falls behind sees a `resync_required` sentinel instead of
//! silently missing events, and re-reads the durable log itself.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_stream::stream;
use futures_util::Stream;
use tokio::sync::broadcast;
use tracing::debug;

use redraft_db::Database;
use redraft_types::JobEvent;

/// Per-subscriber buffer. A subscriber more than this many events behind
/// the publisher is lagged and gets resynced rather than stalled.
const CHANNEL_CAPACITY: usize = 256;

type ChannelMap = RwLock<HashMap<String, broadcast::Sender<JobEvent>>>;

/// Drop a job's channel once its last receiver is gone. Channels are
/// normally torn down by a terminal publish; this covers subscriptions
/// to jobs that were already finished when the subscriber arrived.
fn gc_channel(channels: &ChannelMap, job_id: &str) {
    let mut channels = match channels.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(tx) = channels.get(job_id) {
        if tx.receiver_count() == 0 {
            channels.remove(job_id);
        }
    }
}

#[derive(Default)]
pub struct EventBroadcaster {
    channels: Arc<ChannelMap>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event to live subscribers of its job.
    ///
    /// Callers must have appended the event to the durable log first;
    /// subscribers treat the log, not this channel, as the source of
    /// truth. Send errors (no live subscribers) are expected and ignored.
    pub fn publish(&self, event: &JobEvent) {
        let terminal = event.event_type.is_terminal();
        let job_id = event.job_id.clone();
        {
            let channels = match self.channels.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(tx) = channels.get(&job_id) {
                let _ = tx.send(event.clone());
            }
        }
        // After a terminal event no further events can ever arrive; drop
        // the channel so closed receivers tell subscribers to finish up.
        if terminal {
            let mut channels = match self.channels.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if channels.remove(&job_id).is_some() {
                debug!(job_id = %job_id, "closed event channel for finished job");
            }
        }
    }

    fn receiver(&self, job_id: &str) -> broadcast::Receiver<JobEvent> {
        let mut channels = match self.channels.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Number of jobs with an open live channel.
    pub fn open_channels(&self) -> usize {
        match self.channels.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Stream all events of a job with `sequence > since`, splicing the
    /// durable log into the live feed without gaps or duplicates.
    ///
    /// The receiver is registered *before* the catch-up read, so any event
    /// published during the read is buffered in the channel; live events
    /// at or below the last catch-up sequence are dropped as duplicates.
    /// The stream ends after a terminal event, or after emitting a
    /// `resync_required` sentinel when the subscriber lagged.
    pub fn subscribe(
        &self,
        db: Database,
        job_id: String,
        since: i64,
    ) -> impl Stream<Item = JobEvent> + Send + 'static {
        let channels = Arc::clone(&self.channels);
        let mut rx = self.receiver(&job_id);

        stream! {
            let mut last_seq = since;
            let mut done = false;

            match db.list_events(&job_id, last_seq).await {
                Ok(events) => {
                    for event in events {
                        last_seq = event.sequence;
                        done = event.event_type.is_terminal();
                        yield event;
                        if done {
                            break;
                        }
                    }
                }
                Err(e) => {
                    debug!(job_id = %job_id, error = %e, "catch-up read failed");
                    yield JobEvent::resync_sentinel(&job_id, last_seq);
                    done = true;
                }
            }

            // The catch-up read can come back empty with the job already
            // finished (cursor at or past the terminal event). No publisher
            // will ever touch the channel again, so end the stream here
            // instead of parking on it.
            if !done {
                match db.last_event(&job_id).await {
                    Ok(Some(last))
                        if last.event_type.is_terminal() && last.sequence <= last_seq =>
                    {
                        done = true;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(job_id = %job_id, error = %e, "terminal check failed");
                        yield JobEvent::resync_sentinel(&job_id, last_seq);
                        done = true;
                    }
                }
            }

            while !done {
                match rx.recv().await {
                    Ok(event) => {
                        if event.sequence <= last_seq {
                            continue; // already delivered during catch-up
                        }
                        last_seq = event.sequence;
                        done = event.event_type.is_terminal();
                        yield event;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(job_id = %job_id, skipped, "subscriber lagged, requesting resync");
                        yield JobEvent::resync_sentinel(&job_id, last_seq);
                        done = true;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // The channel closes when the job reaches a terminal
                        // state. Any events published between our last receive
                        // and the close are already durable, so one final log
                        // read delivers them.
                        match db.list_events(&job_id, last_seq).await {
                            Ok(events) => {
                                for event in events {
                                    last_seq = event.sequence;
                                    yield event;
                                }
                            }
                            Err(e) => {
                                debug!(job_id = %job_id, error = %e, "final catch-up read failed");
                                yield JobEvent::resync_sentinel(&job_id, last_seq);
                            }
                        }
                        done = true;
                    }
                }
            }

            drop(rx);
            gc_channel(&channels, &job_id);
        }
    }
}
