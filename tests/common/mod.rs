#![allow(dead_code)]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use viewbus::core::viewmodels::{ViewModel, ViewState};
use viewbus::events::{HandleMessage, HandleMessageAsync, MessageBus};
use viewbus::handles;

/// Message carrying a sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct Numbered(pub u32);

/// Message whose handlers append their name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trail(pub Vec<String>);

/// Message nobody in this file handles.
#[derive(Debug)]
pub struct Ignored;

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

/// Subscriber recording every message it receives in a shared log.
pub struct Recorder {
    pub name: String,
    pub log: Log,
    pub fail_on: Option<u32>,
}

impl Recorder {
    pub fn new(name: &str, log: &Log) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: Arc::clone(log),
            fail_on: None,
        })
    }

    pub fn failing_on(name: &str, log: &Log, value: u32) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: Arc::clone(log),
            fail_on: Some(value),
        })
    }
}

impl HandleMessage<Numbered> for Recorder {
    fn handle(&self, message: &mut Numbered) -> Result<()> {
        self.log.lock().push(format!("{}:{}", self.name, message.0));
        if self.fail_on == Some(message.0) {
            return Err(anyhow!("{} rejects {}", self.name, message.0));
        }
        Ok(())
    }
}

#[async_trait]
impl HandleMessageAsync<Trail> for Recorder {
    async fn handle_async(&self, message: &mut Trail) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        message.0.push(self.name.clone());
        Ok(())
    }
}

handles!(Recorder => [Numbered]; async [Trail]);

/// Request handled by [`PlayerViewModel`].
#[derive(Debug)]
pub struct LoadMedia {
    pub title: String,
    pub fail: bool,
}

/// Small view model used across the integration tests.
pub struct PlayerViewModel {
    pub state: ViewState,
}

impl PlayerViewModel {
    pub fn new(bus: &Arc<MessageBus>) -> Self {
        let state = ViewState::new("player", Arc::clone(bus));
        state.add_dependency("Title", ["HasMedia"]);
        Self { state }
    }
}

impl ViewModel for PlayerViewModel {
    fn state(&self) -> &ViewState {
        &self.state
    }
}

impl HandleMessage<LoadMedia> for PlayerViewModel {
    fn handle(&self, message: &mut LoadMedia) -> Result<()> {
        let _loading = self.state.begin_loading();
        if message.fail {
            self.state.set_error(format!("cannot load {}", message.title));
        } else {
            self.state.clear_error();
            self.state.set("Title", message.title.clone());
        }
        Ok(())
    }
}

handles!(PlayerViewModel => [LoadMedia]);
