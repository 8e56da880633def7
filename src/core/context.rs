/// Identifies the record being processed in log output.
#[derive(Debug, Clone, Default)]
pub struct RecordContext {
    pub source: String,
    pub fund: Option<String>,
    pub manager: Option<String>,
}

impl RecordContext {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            fund: None,
            manager: None,
        }
    }

    pub fn with_fund(mut self, fund: Option<&str>, manager: Option<&str>) -> Self {
        self.fund = fund.map(str::to_string);
        self.manager = manager.map(str::to_string);
        self
    }
}
