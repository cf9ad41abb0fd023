//! Static client profile manifest.
//!
//! Each profile is internally coherent: the user-agent, sec-ch-ua set,
//! platform, and transport impersonation capability all describe the same
//! browser build. The impersonation name must exist in the transport layer's
//! capability list.

/// Static, versioned template an [`Identity`](super::Identity) is minted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientProfile {
    pub user_agent: &'static str,
    pub sec_ch_ua: &'static str,
    pub platform: &'static str,
    pub browser: &'static str,
    pub version: &'static str,
    /// Named TLS/transport impersonation capability.
    pub impersonation: &'static str,
    pub mobile: bool,
}

pub static CLIENT_PROFILES: &[ClientProfile] = &[
    ClientProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36",
        sec_ch_ua: "\"Not A Brand\";v=\"99\", \"Google Chrome\";v=\"142\", \"Chromium\";v=\"142\"",
        platform: "Windows",
        browser: "chrome",
        version: "142",
        impersonation: "chrome142",
        mobile: false,
    },
    ClientProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36",
        sec_ch_ua: "\"Not A Brand\";v=\"99\", \"Google Chrome\";v=\"142\", \"Chromium\";v=\"142\"",
        platform: "macOS",
        browser: "chrome",
        version: "142",
        impersonation: "chrome142",
        mobile: false,
    },
    ClientProfile {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36",
        sec_ch_ua: "\"Not A Brand\";v=\"99\", \"Google Chrome\";v=\"142\", \"Chromium\";v=\"142\"",
        platform: "Linux",
        browser: "chrome",
        version: "142",
        impersonation: "chrome142",
        mobile: false,
    },
    ClientProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36",
        sec_ch_ua: "\"Chromium\";v=\"136\", \"Not A Brand\";v=\"99\", \"Google Chrome\";v=\"136\"",
        platform: "Windows",
        browser: "chrome",
        version: "136",
        impersonation: "chrome136",
        mobile: false,
    },
    ClientProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36",
        sec_ch_ua: "\"Chromium\";v=\"136\", \"Not A Brand\";v=\"99\", \"Google Chrome\";v=\"136\"",
        platform: "macOS",
        browser: "chrome",
        version: "136",
        impersonation: "chrome136",
        mobile: false,
    },
];

pub(crate) static VIEWPORTS: &[(u32, u32)] = &[
    (1920, 1080),
    (1366, 768),
    (1536, 864),
    (1440, 900),
    (1280, 720),
    (2560, 1440),
    (1680, 1050),
    (1600, 900),
    (1920, 1200),
    (1280, 800),
];

pub(crate) static ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.9,en-US;q=0.8",
    "en-US,en;q=0.9,ru;q=0.8",
    "en,en-US;q=0.9",
    "en-US,en;q=0.9,es;q=0.8",
];
