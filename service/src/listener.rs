//! PostgreSQL `LISTEN/NOTIFY` implementation of the notification bridge.

use async_trait::async_trait;
use events::{Error, Notification, NotificationSource, Subscription};
use log::*;
use sqlx::postgres::{PgListener, PgPool};

/// Opens `LISTEN` subscriptions using connections from an existing pool.
#[derive(Clone)]
pub struct PgNotificationSource {
    pool: PgPool,
}

impl PgNotificationSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationSource for PgNotificationSource {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, Error> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(Error::connect)?;
        listener.listen(channel).await.map_err(Error::connect)?;
        debug!("Issued LISTEN on channel {channel}");

        Ok(Box::new(PgSubscription { listener }))
    }
}

/// One dedicated listener connection.
///
/// Dropping it closes the connection, which releases the `LISTEN`.
pub struct PgSubscription {
    listener: PgListener,
}

#[async_trait]
impl Subscription for PgSubscription {
    async fn next(&mut self) -> Result<Option<Notification>, Error> {
        // `try_recv` surfaces a lost connection as `None` rather than reconnecting silently
        match self.listener.try_recv().await.map_err(Error::receive)? {
            Some(notification) => Ok(Some(Notification::new(
                notification.channel(),
                notification.payload(),
            ))),
            None => {
                warn!("Lost the database connection backing the notification listener");
                Ok(None)
            }
        }
    }
}
