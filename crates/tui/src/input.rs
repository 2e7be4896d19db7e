#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputMode {
    Normal,
    Command,
    Search,
}

pub struct InputState {
    pub buffer: String,
    pub mode: InputMode,
    cursor_position: usize,
}

impl Default for InputState {
    fn default() -> Self {
        Self::new()
    }
}

impl InputState {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            mode: InputMode::Normal,
            cursor_position: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.mode != InputMode::Normal
    }

    pub fn start_command(&mut self, prefill: &str) {
        self.buffer = prefill.to_string();
        self.cursor_position = self.buffer.len();
        self.mode = InputMode::Command;
    }

    pub fn start_search(&mut self, current: &str) {
        self.buffer = current.to_string();
        self.cursor_position = self.buffer.len();
        self.mode = InputMode::Search;
    }

    pub fn cursor(&self) -> usize {
        self.cursor_position
    }

    pub fn handle_char(&mut self, c: char) {
        if self.mode == InputMode::Normal && self.buffer.is_empty() && c == '/' {
            self.mode = InputMode::Command;
        }

        self.buffer.push(c);
        self.cursor_position = self.buffer.len();
    }

    pub fn handle_backspace(&mut self) {
        if !self.buffer.is_empty() {
            self.buffer.pop();
            self.cursor_position = self.buffer.len();
        }
        if self.mode == InputMode::Command && self.buffer.is_empty() {
            self.mode = InputMode::Normal;
        }
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.cursor_position = 0;
        self.mode = InputMode::Normal;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_enters_command_mode() {
        let mut input = InputState::new();
        input.handle_char('/');
        assert_eq!(input.mode, InputMode::Command);
        input.handle_char('s');
        assert_eq!(input.buffer, "/s");
        input.handle_backspace();
        input.handle_backspace();
        assert_eq!(input.mode, InputMode::Normal);
    }

    #[test]
    fn search_mode_survives_empty_buffer() {
        let mut input = InputState::new();
        input.start_search("fla");
        input.handle_backspace();
        input.handle_backspace();
        input.handle_backspace();
        input.handle_backspace();
        assert_eq!(input.mode, InputMode::Search);
        assert!(input.buffer.is_empty());
        assert_eq!(input.cursor(), 0);
    }
}
