// Dwn Core - Media download orchestration for mobile
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! User settings and connectivity signals
//!
//! The orchestration core reads settings through [`SettingsProvider`] only.
//! [`SettingsManager`] persists [`AppSettings`] as JSON and combines them with
//! the connectivity published by [`NetworkMonitor`] to answer `can_download`.

use crate::error::{DwnError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::watch;

pub const WIFI_ONLY_REASON: &str =
    "WiFi-only downloads enabled. Please connect to WiFi or disable this setting.";

/// Download quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DownloadQuality {
    #[default]
    Best,
    High,
    Medium,
    Low,
}

impl DownloadQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadQuality::Best => "BEST",
            DownloadQuality::High => "HIGH",
            DownloadQuality::Medium => "MEDIUM",
            DownloadQuality::Low => "LOW",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BEST" => Ok(DownloadQuality::Best),
            "HIGH" => Ok(DownloadQuality::High),
            "MEDIUM" => Ok(DownloadQuality::Medium),
            "LOW" => Ok(DownloadQuality::Low),
            _ => Err(DwnError::InvalidInput(format!("Invalid download quality: {}", s))),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DownloadQuality::Best => "Highest available quality",
            DownloadQuality::High => "720p / 256kbps",
            DownloadQuality::Medium => "480p / 192kbps",
            DownloadQuality::Low => "360p / 128kbps",
        }
    }
}

/// Answer of the download gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadGate {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl DownloadGate {
    pub fn allow() -> Self {
        Self { allowed: true, reason: None }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Settings boundary consumed by the executor and the queue
pub trait SettingsProvider: Send + Sync {
    fn current_quality(&self) -> DownloadQuality;
    fn can_download(&self) -> DownloadGate;
    fn auto_resume_enabled(&self) -> bool;
}

/// Active network transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionType {
    None,
    Wifi,
    Mobile,
    Ethernet,
    Vpn,
    Other,
}

impl ConnectionType {
    pub fn is_connected(&self) -> bool {
        !matches!(self, ConnectionType::None)
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(ConnectionType::None),
            "WIFI" => Ok(ConnectionType::Wifi),
            "MOBILE" | "CELLULAR" => Ok(ConnectionType::Mobile),
            "ETHERNET" => Ok(ConnectionType::Ethernet),
            "VPN" => Ok(ConnectionType::Vpn),
            "OTHER" => Ok(ConnectionType::Other),
            _ => Err(DwnError::InvalidInput(format!("Invalid connection type: {}", s))),
        }
    }
}

/// Connectivity signal fed by the platform
#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<ConnectionType>,
}

impl NetworkMonitor {
    pub fn new(initial: ConnectionType) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Platform callback: the active transport changed
    pub fn set_connection(&self, connection: ConnectionType) {
        let previous = self.tx.send_replace(connection);
        if previous != connection {
            log::info!("Connectivity changed: {:?} -> {:?}", previous, connection);
        }
    }

    pub fn current(&self) -> ConnectionType {
        *self.tx.borrow()
    }

    pub fn is_wifi(&self) -> bool {
        self.current() == ConnectionType::Wifi
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionType> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(ConnectionType::Wifi)
    }
}

/// Persisted user settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub download_quality: DownloadQuality,
    pub wifi_only_downloads: bool,
    pub auto_resume_downloads: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            download_quality: DownloadQuality::Best,
            wifi_only_downloads: false,
            auto_resume_downloads: true,
        }
    }
}

/// JSON-file settings store implementing [`SettingsProvider`]
pub struct SettingsManager {
    path: Option<PathBuf>,
    settings: RwLock<AppSettings>,
    network: std::sync::Arc<NetworkMonitor>,
}

impl SettingsManager {
    /// Load settings from `path`, falling back to defaults when absent or unreadable
    pub fn load(path: impl AsRef<Path>, network: std::sync::Arc<NetworkMonitor>) -> Self {
        let path = path.as_ref().to_path_buf();
        let settings = match std::fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                log::warn!("Ignoring unreadable settings {}: {}", path.display(), e);
                AppSettings::default()
            }),
            Err(_) => AppSettings::default(),
        };

        Self {
            path: Some(path),
            settings: RwLock::new(settings),
            network,
        }
    }

    /// Settings held in memory only
    pub fn in_memory(settings: AppSettings, network: std::sync::Arc<NetworkMonitor>) -> Self {
        Self {
            path: None,
            settings: RwLock::new(settings),
            network,
        }
    }

    pub fn settings(&self) -> AppSettings {
        self.settings.read().clone()
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn set_download_quality(&self, quality: DownloadQuality) -> Result<()> {
        self.update(|s| s.download_quality = quality)
    }

    pub fn set_wifi_only(&self, enabled: bool) -> Result<()> {
        self.update(|s| s.wifi_only_downloads = enabled)
    }

    pub fn set_auto_resume(&self, enabled: bool) -> Result<()> {
        self.update(|s| s.auto_resume_downloads = enabled)
    }

    fn update(&self, change: impl FnOnce(&mut AppSettings)) -> Result<()> {
        let snapshot = {
            let mut settings = self.settings.write();
            change(&mut settings);
            settings.clone()
        };
        self.save(&snapshot)
    }

    fn save(&self, settings: &AppSettings) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(settings)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl SettingsProvider for SettingsManager {
    fn current_quality(&self) -> DownloadQuality {
        self.settings.read().download_quality
    }

    fn can_download(&self) -> DownloadGate {
        if !self.settings.read().wifi_only_downloads || self.network.is_wifi() {
            DownloadGate::allow()
        } else {
            DownloadGate::deny(WIFI_ONLY_REASON)
        }
    }

    fn auto_resume_enabled(&self) -> bool {
        self.settings.read().auto_resume_downloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_gate_without_wifi_only() {
        let network = Arc::new(NetworkMonitor::new(ConnectionType::Mobile));
        let settings = SettingsManager::in_memory(AppSettings::default(), network);
        assert_eq!(settings.can_download(), DownloadGate::allow());
    }

    #[test]
    fn test_gate_wifi_only() {
        let network = Arc::new(NetworkMonitor::new(ConnectionType::Mobile));
        let settings = SettingsManager::in_memory(AppSettings::default(), network.clone());
        settings.set_wifi_only(true).unwrap();

        let gate = settings.can_download();
        assert!(!gate.allowed);
        assert_eq!(gate.reason.as_deref(), Some(WIFI_ONLY_REASON));

        network.set_connection(ConnectionType::Wifi);
        assert!(settings.can_download().allowed);
    }

    #[test]
    fn test_persisted_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let network = Arc::new(NetworkMonitor::default());

        let settings = SettingsManager::load(&path, network.clone());
        assert_eq!(settings.settings(), AppSettings::default());
        settings.set_download_quality(DownloadQuality::Medium).unwrap();
        settings.set_auto_resume(false).unwrap();

        let reloaded = SettingsManager::load(&path, network);
        assert_eq!(reloaded.current_quality(), DownloadQuality::Medium);
        assert!(!reloaded.auto_resume_enabled());
    }

    #[test]
    fn test_corrupt_settings_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let settings = SettingsManager::load(&path, Arc::new(NetworkMonitor::default()));
        assert_eq!(settings.current_quality(), DownloadQuality::Best);
    }

    #[tokio::test]
    async fn test_network_monitor_publishes() {
        let monitor = NetworkMonitor::new(ConnectionType::None);
        let mut rx = monitor.subscribe();
        monitor.set_connection(ConnectionType::Wifi);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionType::Wifi);
        assert!(monitor.current().is_connected());
    }

    #[test]
    fn test_quality_parsing() {
        assert_eq!(DownloadQuality::from_str("high").unwrap(), DownloadQuality::High);
        assert!(DownloadQuality::from_str("ultra").is_err());
    }
}
