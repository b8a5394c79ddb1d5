//! Outbound notifications
//!
//! Everything the engine tells subscribers goes through [`Notification`].
//! Delivery is best-effort; settlement correctness never depends on it.

use serde::Serialize;

use super::price::Kline;
use super::wager::Wager;
use super::wallet::Wallet;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    WagerOpened {
        wager: Wager,
    },
    WagerSettled {
        wager: Wager,
        profit: f64,
    },
    AccountUpdated {
        account_id: String,
        wallet: Option<Wallet>,
    },
    Kline {
        kline: Kline,
    },
}

/// Event addressed to a subscriber topic
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub topic: String,
    pub event: EngineEvent,
}

impl Notification {
    pub fn wager_opened(wager: &Wager) -> Self {
        Self {
            topic: format!("bets/{}", wager.account_id),
            event: EngineEvent::WagerOpened {
                wager: wager.clone(),
            },
        }
    }

    pub fn wager_settled(wager: &Wager) -> Self {
        Self {
            topic: format!("bets/{}", wager.account_id),
            event: EngineEvent::WagerSettled {
                wager: wager.clone(),
                profit: wager.profit(),
            },
        }
    }

    pub fn account_updated(account_id: &str, wallet: Option<Wallet>) -> Self {
        Self {
            topic: format!("account/{}", account_id),
            event: EngineEvent::AccountUpdated {
                account_id: account_id.to_string(),
                wallet,
            },
        }
    }

    pub fn kline(kline: Kline) -> Self {
        Self {
            topic: format!("klines/{}/{}", kline.pair, kline.interval),
            event: EngineEvent::Kline { kline },
        }
    }

    /// JSON payload for transports that push text frames
    pub fn payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.event)
    }
}
