#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    Boot,
    PageLoad,
    PageMutate,
    PageSnapshot,
    Tick,
    TranslateText,
    PackageList,
    PackageSetEnabled,
    CheckUpdates,
    Status,
    Notices,
    Unknown,
}

impl From<&str> for Command {
    fn from(s: &str) -> Self {
        match s {
            "ping" => Command::Ping,
            "boot" => Command::Boot,
            "page.load" => Command::PageLoad,
            "page.mutate" => Command::PageMutate,
            "page.snapshot" => Command::PageSnapshot,
            "tick" => Command::Tick,
            "translate_text" => Command::TranslateText,
            "package.list" => Command::PackageList,
            "package.set_enabled" => Command::PackageSetEnabled,
            "manifest.check_updates" | "check_updates" => Command::CheckUpdates,
            "status" => Command::Status,
            "notices" => Command::Notices,
            _ => Command::Unknown,
        }
    }
}
