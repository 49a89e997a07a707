use super::{
    ingress::{Mailbox, Message},
    metrics, Config, Error, Writers,
};
use crate::store::Store;
use commonware_runtime::{Clock, Handle, Metrics, Spawner};
use futures::{channel::mpsc, StreamExt};
use tracing::{debug, error, trace, warn};

/// Owns the [Writers] of a process and serializes requests from any number of [Mailbox]es.
pub struct Actor<E: Clock + Spawner + Metrics, S: Store> {
    context: E,
    writers: Writers<E, S>,
    mailbox: mpsc::Receiver<Message>,
    metrics: metrics::Metrics,
}

impl<E: Clock + Spawner + Metrics, S: Store> Actor<E, S> {
    /// Create a new [Actor] and the [Mailbox] used to send it requests.
    pub fn new(context: E, store: S, cfg: Config) -> Result<(Self, Mailbox), Error> {
        let writers = Writers::new(context.clone(), store, &cfg)?;
        let (sender, receiver) = mpsc::channel(cfg.mailbox_size);
        let metrics = metrics::Metrics::init(context.clone());
        Ok((
            Self {
                context,
                writers,
                mailbox: receiver,
                metrics,
            },
            Mailbox::new(sender),
        ))
    }

    /// Start processing requests.
    ///
    /// The returned handle resolves once every buffered record has been drained (after
    /// [Mailbox::close] or once every [Mailbox] is dropped).
    pub fn start(mut self) -> Handle<()> {
        self.context.spawn_ref()(self.run())
    }

    async fn run(mut self) {
        let mut closer = None;
        while let Some(message) = self.mailbox.next().await {
            match message {
                Message::Submit {
                    submission,
                    signals,
                    responder,
                } => {
                    trace!("mailbox: submit");
                    self.metrics.submissions.inc();
                    let result = self.writers.submit(&submission, signals).await;
                    if let Err(err) = &result {
                        if !matches!(err, Error::Bucket(_)) {
                            self.metrics.unsupported.inc();
                        }
                        warn!(object_id = submission.object_id(), ?err, "submission failed");
                    }
                    let _ = responder.send(result);
                }
                Message::Flush { responder } => {
                    trace!("mailbox: flush");
                    let _ = responder.send(self.writers.flush().await);
                }
                Message::Close { responder } => {
                    trace!("mailbox: close");
                    closer = Some(responder);
                    break;
                }
            }
        }

        // Reject any further requests and drain
        self.mailbox.close();
        debug!("draining writers");
        let result = self.writers.close().await;
        if let Err(err) = &result {
            error!(?err, "failed to drain writers");
        }
        if let Some(closer) = closer {
            let _ = closer.send(result);
        }
    }
}
