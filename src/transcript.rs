//! Turn-based transcript aggregation.
//!
//! Input (user) and output (model) fragments accumulate separately until the
//! server flags the turn as complete; then both are committed to history.

#[derive(Debug, Default, Clone)]
pub struct TurnAggregator {
    input: String,
    output: String,
    history: Vec<String>,
}

impl TurnAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_input(&mut self, fragment: &str) {
        self.input.push_str(fragment);
    }

    pub fn append_output(&mut self, fragment: &str) {
        self.output.push_str(fragment);
    }

    /// Commit the current turn: input then output as two history entries.
    ///
    /// Returns the committed pair and leaves both accumulators empty.
    pub fn complete_turn(&mut self) -> (String, String) {
        let input = std::mem::take(&mut self.input);
        let output = std::mem::take(&mut self.output);
        self.history.push(input.clone());
        self.history.push(output.clone());
        (input, output)
    }

    pub fn current_input(&self) -> &str {
        &self.input
    }

    pub fn current_output(&self) -> &str {
        &self.output
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// New session: drop accumulators and history.
    pub fn reset(&mut self) {
        self.input.clear();
        self.output.clear();
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_turn_commits_input_then_output() {
        let mut turns = TurnAggregator::new();
        turns.append_input("hel");
        turns.append_output("hi ");
        turns.append_input("lo");
        turns.append_output("there");

        let committed = turns.complete_turn();
        assert_eq!(committed, ("hello".to_string(), "hi there".to_string()));
        assert_eq!(turns.history(), ["hello", "hi there"]);
        assert_eq!(turns.current_input(), "");
        assert_eq!(turns.current_output(), "");
    }

    #[test]
    fn fragments_after_completion_start_the_next_turn() {
        let mut turns = TurnAggregator::new();
        turns.append_input("one");
        turns.append_output("uno");
        turns.complete_turn();
        turns.append_input("two");
        turns.append_output("dos");
        turns.complete_turn();
        assert_eq!(turns.history(), ["one", "uno", "two", "dos"]);
    }

    #[test]
    fn empty_turn_still_commits_two_entries() {
        let mut turns = TurnAggregator::new();
        turns.append_output("only the model spoke");
        turns.complete_turn();
        assert_eq!(turns.history(), ["", "only the model spoke"]);
    }

    #[test]
    fn reset_clears_everything() {
        let mut turns = TurnAggregator::new();
        turns.append_input("a");
        turns.complete_turn();
        turns.append_output("b");
        turns.reset();
        assert!(turns.history().is_empty());
        assert_eq!(turns.current_output(), "");
    }
}
