//! Recording fakes for every collaborator trait.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use rosc::OscMessage;

use super::{
    Camera, CaptureOptions, Channel, ChatClient, HostControl, SheetRow, SheetStore, Sinks,
    SocialPoster,
};
use crate::osc::Transport;

#[derive(Default)]
pub(crate) struct FakeChat {
    pub channels: Vec<Channel>,
    pub fail_sends: bool,
    pub fail_listing: bool,
    /// Number of `connect` calls that fail before one succeeds.
    pub connect_failures: AtomicU32,
    pub connects: AtomicU32,
    pub texts: Mutex<Vec<(String, String)>>,
    pub files: Mutex<Vec<(String, PathBuf)>>,
}

impl FakeChat {
    pub fn with_channels(names: &[&str]) -> Self {
        Self {
            channels: names
                .iter()
                .enumerate()
                .map(|(i, n)| Channel {
                    id: format!("id-{i}"),
                    name: n.to_string(),
                })
                .collect(),
            ..Self::default()
        }
    }

    pub fn texts(&self) -> Vec<(String, String)> {
        self.texts.lock().unwrap().clone()
    }

    pub fn files(&self) -> Vec<(String, PathBuf)> {
        self.files.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for FakeChat {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            bail!("login refused");
        }
        Ok(())
    }

    async fn list_channels(&self) -> Result<Vec<Channel>> {
        if self.fail_listing {
            bail!("channel listing failed");
        }
        Ok(self.channels.clone())
    }

    async fn send_text(&self, channel_id: &str, text: &str) -> Result<()> {
        if self.fail_sends {
            bail!("send failed");
        }
        self.texts
            .lock()
            .unwrap()
            .push((channel_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_file(&self, channel_id: &str, path: &Path) -> Result<()> {
        if self.fail_sends {
            bail!("upload failed");
        }
        self.files
            .lock()
            .unwrap()
            .push((channel_id.to_string(), path.to_path_buf()));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeSheets {
    pub fail: bool,
    pub ensured: Mutex<Vec<(String, Vec<String>)>>,
    pub rows: Mutex<Vec<(String, Vec<serde_json::Value>)>>,
    pub headers: Mutex<Vec<(String, Vec<String>)>>,
}

#[async_trait]
impl SheetStore for FakeSheets {
    async fn authenticate(&self) -> Result<()> {
        Ok(())
    }

    async fn ensure_sheet(&self, name: &str, header: &[String]) -> Result<()> {
        if self.fail {
            bail!("sheets unavailable");
        }
        self.ensured
            .lock()
            .unwrap()
            .push((name.to_string(), header.to_vec()));
        Ok(())
    }

    async fn append_row(&self, name: &str, values: &[serde_json::Value]) -> Result<()> {
        if self.fail {
            bail!("sheets unavailable");
        }
        self.rows
            .lock()
            .unwrap()
            .push((name.to_string(), values.to_vec()));
        Ok(())
    }

    async fn update_header_row(&self, name: &str, values: &[String]) -> Result<()> {
        if self.fail {
            bail!("sheets unavailable");
        }
        self.headers
            .lock()
            .unwrap()
            .push((name.to_string(), values.to_vec()));
        Ok(())
    }

    async fn read_rows(&self, _name: &str) -> Result<Vec<SheetRow>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub(crate) struct FakeSocial {
    pub fail: bool,
    pub posts: Mutex<Vec<String>>,
}

#[async_trait]
impl SocialPoster for FakeSocial {
    async fn post_text(&self, body: &str) -> Result<()> {
        if self.fail {
            bail!("post rejected");
        }
        self.posts.lock().unwrap().push(body.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeCamera {
    pub fail: bool,
    pub captures: AtomicU32,
}

#[async_trait]
impl Camera for FakeCamera {
    async fn capture_jpeg(&self, _path: &Path, _options: CaptureOptions) -> Result<()> {
        if self.fail {
            bail!("camera not detected");
        }
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeHost {
    pub fail: bool,
    /// Attempts, successful or not.
    pub reboots: AtomicU32,
}

#[async_trait]
impl HostControl for FakeHost {
    async fn reboot(&self) -> Result<()> {
        self.reboots.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("sudo: a password is required");
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeTransport {
    pub sent: Mutex<Vec<(String, OscMessage)>>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, host: &str, msg: OscMessage) -> Result<()> {
        self.sent.lock().unwrap().push((host.to_string(), msg));
        Ok(())
    }
}

/// Handles to the fakes behind a [`Sinks`] bundle, for assertions.
pub(crate) struct Fakes {
    pub chat: Arc<FakeChat>,
    pub sheets: Arc<FakeSheets>,
    pub social: Arc<FakeSocial>,
    pub camera: Arc<FakeCamera>,
    pub host: Arc<FakeHost>,
    pub transport: Arc<FakeTransport>,
}

impl Fakes {
    pub fn new(chat: FakeChat) -> Self {
        Self {
            chat: Arc::new(chat),
            sheets: Arc::new(FakeSheets::default()),
            social: Arc::new(FakeSocial::default()),
            camera: Arc::new(FakeCamera::default()),
            host: Arc::new(FakeHost::default()),
            transport: Arc::new(FakeTransport::default()),
        }
    }

    pub fn sinks(&self) -> Sinks {
        Sinks {
            chat: self.chat.clone(),
            sheets: Some(self.sheets.clone()),
            social: Some(self.social.clone()),
            camera: Some(self.camera.clone()),
            host: self.host.clone(),
            transport: self.transport.clone(),
        }
    }

    pub fn reboots(&self) -> u32 {
        self.host.reboots.load(Ordering::SeqCst)
    }
}
