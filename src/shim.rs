//! One-time compatibility patch for the acquisition API
//!
//! Some platforms need their global acquisition entry points patched before
//! they behave consistently. The patch mutates shared state, so it is applied
//! lazily on the first start and, once it has succeeded, never again: later
//! calls get the successful result back.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::{debug, info};

use crate::error::CameraError;
use crate::media::Platform;

/// Platform family detected from the user agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Browser {
    Chrome,
    Firefox,
    Safari,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDetails {
    pub browser: Browser,
    pub version: Option<u32>,
}

/// Detect the platform family and major version from a user agent string
pub fn detect_platform(user_agent: &str) -> PlatformDetails {
    // Chromium-based agents also advertise AppleWebKit and Safari, so the
    // order of these checks matters.
    let (browser, version) = if let Some(v) = version_after(user_agent, "Firefox/") {
        (Browser::Firefox, Some(v))
    } else if let Some(v) = version_after(user_agent, "Chrome/")
        .or_else(|| version_after(user_agent, "Chromium/"))
    {
        (Browser::Chrome, Some(v))
    } else if let Some(v) = version_after(user_agent, "AppleWebKit/") {
        (Browser::Safari, Some(v))
    } else {
        (Browser::Unknown, None)
    };

    PlatformDetails { browser, version }
}

/// Major version number following `marker`, e.g. `Chrome/120.0` -> 120
fn version_after(user_agent: &str, marker: &str) -> Option<u32> {
    let start = user_agent.find(marker)? + marker.len();
    let digits: String = user_agent[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Runs an action until it first succeeds and replays that result afterwards.
/// A failed run leaves nothing behind, so the next call tries again.
pub struct Idempotent<T> {
    result: Mutex<Option<T>>,
}

impl<T: Clone> Idempotent<T> {
    pub const fn new() -> Self {
        Self {
            result: Mutex::new(None),
        }
    }

    /// Concurrent callers are serialized, so a successful action runs once.
    pub fn call<E>(&self, action: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let mut result = self.lock();
        if let Some(value) = result.as_ref() {
            return Ok(value.clone());
        }
        let value = action()?;
        *result = Some(value.clone());
        Ok(value)
    }

    pub fn has_run(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.result.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone> Default for Idempotent<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies the platform compatibility patch once it succeeds
pub struct ShimLoader {
    once: Idempotent<PlatformDetails>,
}

impl ShimLoader {
    pub const fn new() -> Self {
        Self {
            once: Idempotent::new(),
        }
    }

    /// Process-wide loader used by sessions that are not given their own
    pub fn shared() -> Arc<ShimLoader> {
        static SHARED: OnceLock<Arc<ShimLoader>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(ShimLoader::new())).clone()
    }

    /// Detect the platform and apply its patch, or replay the first successful
    /// outcome. A failed patch has not touched the entry points and is retried
    /// on the next call.
    pub fn load(&self, platform: &dyn Platform) -> Result<PlatformDetails, CameraError> {
        if self.once.has_run() {
            debug!("Compatibility shim already applied");
        }
        self.once.call(|| {
            let details = detect_platform(&platform.user_agent());
            match details.browser {
                Browser::Chrome | Browser::Firefox | Browser::Safari => {
                    platform.apply_compat_patch(&details)?;
                    info!(
                        "Applied {:?} compatibility shim (version {:?})",
                        details.browser, details.version
                    );
                    Ok(details)
                }
                Browser::Unknown => Err(CameraError::StreamApiNotSupported),
            }
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.once.has_run()
    }
}

impl Default for ShimLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatorConfig;
    use crate::media::simulated::SimulatedPlatform;

    const CHROME_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const FIREFOX_UA: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";
    const SAFARI_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1";

    #[test]
    fn test_detect_platform() {
        assert_eq!(
            detect_platform(CHROME_UA),
            PlatformDetails {
                browser: Browser::Chrome,
                version: Some(120)
            }
        );
        assert_eq!(detect_platform(FIREFOX_UA).browser, Browser::Firefox);
        assert_eq!(detect_platform(FIREFOX_UA).version, Some(121));
        assert_eq!(detect_platform(SAFARI_UA).browser, Browser::Safari);
        assert_eq!(detect_platform(SAFARI_UA).version, Some(605));
        assert_eq!(detect_platform("curl/8.4.0").browser, Browser::Unknown);
    }

    #[test]
    fn test_idempotent_replays_first_success() {
        let once = Idempotent::new();
        assert!(!once.has_run());
        assert_eq!(once.call(|| Err::<u32, _>("busy")), Err("busy"));
        assert!(!once.has_run());
        assert_eq!(once.call(|| Ok::<_, &str>(1)), Ok(1));
        assert_eq!(once.call(|| Ok::<_, &str>(2)), Ok(1));
        assert!(once.has_run());
    }

    #[test]
    fn test_patch_applied_once() {
        let platform = SimulatedPlatform::new(SimulatorConfig::default());
        let loader = ShimLoader::new();

        let first = loader.load(&platform).unwrap();
        let second = loader.load(&platform).unwrap();
        assert_eq!(first, second);
        assert_eq!(platform.compat_patch_count(), 1);
        assert!(loader.is_loaded());
    }

    #[test]
    fn test_failed_patch_is_retried() {
        let platform = SimulatedPlatform::new(SimulatorConfig::default());
        let loader = ShimLoader::new();
        platform.fail_next_compat_patch(CameraError::StreamApiNotSupported);

        assert_eq!(loader.load(&platform), Err(CameraError::StreamApiNotSupported));
        assert!(!loader.is_loaded());
        assert_eq!(platform.compat_patch_attempts(), 1);

        assert_eq!(loader.load(&platform).unwrap().browser, Browser::Chrome);
        assert_eq!(platform.compat_patch_attempts(), 2);
        assert_eq!(platform.compat_patch_count(), 1);

        loader.load(&platform).unwrap();
        assert_eq!(platform.compat_patch_attempts(), 2);
    }

    #[test]
    fn test_unknown_platform_is_unsupported_until_detected() {
        let platform = SimulatedPlatform::new(SimulatorConfig {
            user_agent: "curl/8.4.0".to_string(),
            ..SimulatorConfig::default()
        });
        let loader = ShimLoader::new();

        assert_eq!(loader.load(&platform), Err(CameraError::StreamApiNotSupported));
        assert_eq!(loader.load(&platform), Err(CameraError::StreamApiNotSupported));
        assert_eq!(platform.compat_patch_count(), 0);
        assert!(!loader.is_loaded());

        platform.set_user_agent(FIREFOX_UA);
        assert_eq!(loader.load(&platform).unwrap().browser, Browser::Firefox);
        assert_eq!(platform.compat_patch_count(), 1);
    }
}
