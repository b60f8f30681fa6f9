//! Multiple-choice quiz items parsed from model output.

use super::types::StageError;
use serde::{Deserialize, Serialize};

/// Letter of a quiz option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerKey {
    /// Option A.
    #[serde(alias = "a")]
    A,
    /// Option B.
    #[serde(alias = "b")]
    B,
    /// Option C.
    #[serde(alias = "c")]
    C,
    /// Option D.
    #[serde(alias = "d")]
    D,
}

/// The four answer options of a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizOptions {
    /// Option A.
    #[serde(rename = "A")]
    pub a: String,
    /// Option B.
    #[serde(rename = "B")]
    pub b: String,
    /// Option C.
    #[serde(rename = "C")]
    pub c: String,
    /// Option D.
    #[serde(rename = "D")]
    pub d: String,
}

/// One multiple-choice question with its correct answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    /// Question text.
    pub question: String,
    /// Answer options keyed by letter.
    pub options: QuizOptions,
    /// Letter of the correct option.
    pub answer: AnswerKey,
}

/// Parse the JSON array a model returned for a quiz prompt.
///
/// Models often wrap the array in prose or a code fence, so only the outermost `[...]` is read.
/// Items with a blank question are dropped; an array with no usable items is an error.
pub fn parse_quiz(raw: &str) -> Result<Vec<QuizQuestion>, StageError> {
    let array = match (raw.find('['), raw.rfind(']')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => {
            return Err(StageError::MalformedOutput(
                "no JSON array in model output".into(),
            ));
        }
    };

    let questions: Vec<QuizQuestion> = serde_json::from_str(array)
        .map_err(|error| StageError::MalformedOutput(error.to_string()))?;
    let questions: Vec<QuizQuestion> = questions
        .into_iter()
        .filter(|item| !item.question.trim().is_empty())
        .collect();

    if questions.is_empty() {
        return Err(StageError::EmptyOutput);
    }
    Ok(questions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ONE_ITEM: &str = r#"[{"question": "What do mitochondria make?",
        "options": {"A": "ATP", "B": "DNA", "C": "Lipids", "D": "Starch"},
        "answer": "A"}]"#;

    #[test]
    fn parses_bare_array() {
        let quiz = parse_quiz(ONE_ITEM).expect("quiz");
        assert_eq!(quiz.len(), 1);
        assert_eq!(quiz[0].question, "What do mitochondria make?");
        assert_eq!(quiz[0].options.a, "ATP");
        assert_eq!(quiz[0].answer, AnswerKey::A);
    }

    #[test]
    fn tolerates_code_fence_and_lowercase_answer() {
        let raw = format!(
            "Here is your quiz:\n```json\n{}\n```",
            ONE_ITEM.replace("\"A\"}", "\"a\"}")
        );
        let quiz = parse_quiz(&raw).expect("quiz");
        assert_eq!(quiz[0].answer, AnswerKey::A);
    }

    #[test]
    fn serializes_with_letter_keys() {
        let quiz = parse_quiz(ONE_ITEM).expect("quiz");
        assert_eq!(
            serde_json::to_value(&quiz[0]).expect("json"),
            json!({
                "question": "What do mitochondria make?",
                "options": { "A": "ATP", "B": "DNA", "C": "Lipids", "D": "Starch" },
                "answer": "A"
            })
        );
    }

    #[test]
    fn rejects_prose_and_invalid_items() {
        assert!(matches!(
            parse_quiz("I cannot write a quiz."),
            Err(StageError::MalformedOutput(_))
        ));
        assert!(matches!(
            parse_quiz(r#"[{"question": "Q?", "options": {"A": "x"}, "answer": "A"}]"#),
            Err(StageError::MalformedOutput(_))
        ));
        assert!(matches!(
            parse_quiz(r#"[{"question": "Q?", "options": {"A": "1", "B": "2", "C": "3", "D": "4"}, "answer": "E"}]"#),
            Err(StageError::MalformedOutput(_))
        ));
    }

    #[test]
    fn empty_array_is_no_output() {
        assert!(matches!(parse_quiz("[]"), Err(StageError::EmptyOutput)));
    }
}
