use schemars::JsonSchema;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptchaOperation {
    Addition,
    Subtraction,
    Multiplication,
}

impl CaptchaOperation {
    pub fn symbol(&self) -> char {
        match self {
            CaptchaOperation::Addition => '+',
            CaptchaOperation::Subtraction => '-',
            CaptchaOperation::Multiplication => '×',
        }
    }

    pub fn apply(&self, left: i64, right: i64) -> i64 {
        match self {
            CaptchaOperation::Addition => left + right,
            CaptchaOperation::Subtraction => left - right,
            CaptchaOperation::Multiplication => left * right,
        }
    }
}

/// A generated question. The expected answer stays inside this struct; it has no serializer and
/// its `Debug` output omits it.
#[derive(Clone, PartialEq, Eq)]
pub struct CaptchaQuestion {
    pub left: i64,
    pub right: i64,
    pub operation: CaptchaOperation,
    answer: i64,
}

impl CaptchaQuestion {
    pub fn new(left: i64, right: i64, operation: CaptchaOperation) -> Self {
        Self {
            left,
            right,
            operation,
            answer: operation.apply(left, right),
        }
    }

    pub fn prompt(&self) -> String {
        format!("What is {} {} {}?", self.left, self.operation.symbol(), self.right)
    }

    pub fn is_answer(&self, value: i64) -> bool {
        self.answer == value
    }

    #[cfg(test)]
    pub(crate) fn expected_answer(&self) -> i64 {
        self.answer
    }
}

impl fmt::Debug for CaptchaQuestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptchaQuestion")
            .field("left", &self.left)
            .field("right", &self.right)
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaVerdict {
    Verified,
    Incorrect,
    /// No question is being shown (idle or already verified).
    NotPresented,
    /// The previous answer was wrong and the replacement question is not out yet.
    CoolingDown,
}

/// CAPTCHA state exposed to the sign-in form.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct CaptchaResponse {
    pub required: bool,
    pub question: Option<String>,
}
