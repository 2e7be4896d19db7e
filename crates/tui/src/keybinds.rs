pub struct Keybinds;

impl Default for Keybinds {
    fn default() -> Self {
        Self
    }
}

impl Keybinds {
    pub fn help_text(&self) -> String {
        r#"Keyboard Shortcuts:

Setup:
  Enter         Run or continue the current step
  ← / →         Choose the download platform
  c             Clear the agent error

Navigation:
  Tab / Shift+Tab   Next/previous page
  1-6           Jump to a page
  ↑ / ↓         Select device or tool / scroll logs

Devices:
  s             Scan for devices
  f             Flash the selected device
  t             Throughput test on the selected device
  x             Cancel the running throughput test

Tools:
  Enter / d     Download the selected tool
  a             Download every missing tool

Logs:
  l             Cycle level filter
  Ctrl + F      Search logs
  End           Follow newest entries

Commands:
  /             Open the command bar (/help lists commands)

General:
  ?             Toggle this help
  Shift + E     Show latest error details
  Ctrl + Q      Quit
"#
        .to_string()
    }
}
