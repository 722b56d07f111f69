// Coarse User-Agent classification for connected-device descriptors
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Mobile,
    Tablet,
    Desktop,
    Bot,
    Unknown,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceClass::Mobile => "mobile",
            DeviceClass::Tablet => "tablet",
            DeviceClass::Desktop => "desktop",
            DeviceClass::Bot => "bot",
            DeviceClass::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub os: Option<&'static str>,
    pub class: DeviceClass,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.os.unwrap_or("Unknown OS"), self.class)
    }
}

// Checked in order; iPadOS and Android tablets must win over the generic phone markers.
const OS_MARKERS: &[(&str, &str)] = &[
    ("ipad", "iPadOS"),
    ("iphone", "iOS"),
    ("android", "Android"),
    ("windows", "Windows"),
    ("mac os x", "macOS"),
    ("cros", "ChromeOS"),
    ("linux", "Linux"),
];

pub fn parse_user_agent(user_agent: Option<&str>) -> DeviceInfo {
    let Some(ua) = user_agent.map(str::to_ascii_lowercase) else {
        return DeviceInfo {
            os: None,
            class: DeviceClass::Unknown,
        };
    };

    let os = OS_MARKERS
        .iter()
        .find(|(marker, _)| ua.contains(marker))
        .map(|(_, name)| *name);

    let class = if ua.contains("bot") || ua.contains("spider") || ua.contains("crawl") {
        DeviceClass::Bot
    } else if ua.contains("ipad") || ua.contains("tablet") || (ua.contains("android") && !ua.contains("mobile")) {
        DeviceClass::Tablet
    } else if ua.contains("mobile") || ua.contains("iphone") {
        DeviceClass::Mobile
    } else if os.is_some() {
        DeviceClass::Desktop
    } else {
        DeviceClass::Unknown
    };

    DeviceInfo { os, class }
}
