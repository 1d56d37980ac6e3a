use schema::{Answers, Assessment, Question};

use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoreReport {
    pub score: f64,
    pub correct_answers: usize,
    pub total_questions: usize,
}

/// Percentage of the assessment's questions answered with the correct option.
///
/// Answers to questions not in the assessment are ignored. An assessment
/// without questions scores 0.
pub fn calculate_score(assessment: &Assessment, answers: &Answers) -> ScoreReport {
    let total_questions = assessment.questions.len();
    let correct_answers = answers
        .iter()
        .filter(|(question_id, selected)| {
            assessment
                .questions
                .iter()
                .find(|q| &q.id == *question_id)
                .is_some_and(|q| compare_answer(q, **selected))
        })
        .count();

    let score = if total_questions == 0 {
        0.0
    } else {
        (correct_answers as f64 / total_questions as f64) * 100.0
    };

    ScoreReport {
        score,
        correct_answers,
        total_questions,
    }
}

pub fn compare_answer(question: &Question, selected: i64) -> bool {
    question.correct_option == selected
}

/// Rejects option indices outside a question's options.
pub fn validate_answers(assessment: &Assessment, answers: &Answers) -> Result<(), Error> {
    for (question_id, selected) in answers {
        let Some(question) = assessment.questions.iter().find(|q| &q.id == question_id) else {
            continue;
        };
        let in_range = usize::try_from(*selected).is_ok_and(|i| i < question.options.len());
        if !in_range {
            return Err(Error::InvalidAnswer(format!(
                "option {selected} does not exist for question {question_id}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use mongodb::bson::oid::ObjectId;
    use schema::AssessmentKind;

    use super::*;

    fn assessment() -> Assessment {
        let question = |id: &str, correct_option| Question {
            id: id.to_string(),
            prompt: format!("prompt {id}"),
            options: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            correct_option,
        };
        Assessment {
            id: ObjectId::new(),
            kind: AssessmentKind::Exam,
            title: "Ownership".to_string(),
            instructor_id: ObjectId::new(),
            requires_proctoring: true,
            questions: vec![question("q1", 0), question("q2", 2)],
        }
    }

    #[test]
    fn all_correct_scores_100() {
        let answers = Answers::from([("q1".to_string(), 0), ("q2".to_string(), 2)]);
        let report = calculate_score(&assessment(), &answers);
        assert_eq!(report.score, 100.0);
        assert_eq!(report.correct_answers, 2);
        assert_eq!(report.total_questions, 2);
    }

    #[test]
    fn unanswered_questions_count_against_score() {
        let answers = Answers::from([("q1".to_string(), 0)]);
        let report = calculate_score(&assessment(), &answers);
        assert_eq!(report.score, 50.0);
    }

    #[test]
    fn unknown_questions_are_ignored() {
        let answers = Answers::from([("q9".to_string(), 0), ("q2".to_string(), 1)]);
        let report = calculate_score(&assessment(), &answers);
        assert_eq!(report.correct_answers, 0);
        assert_eq!(report.score, 0.0);
    }

    #[test]
    fn empty_assessment_scores_zero() {
        let mut empty = assessment();
        empty.questions.clear();
        let report = calculate_score(&empty, &Answers::new());
        assert_eq!(report.score, 0.0);
        assert_eq!(report.total_questions, 0);
    }

    #[test]
    fn out_of_range_option_is_rejected() {
        let answers = Answers::from([("q1".to_string(), 7)]);
        assert!(validate_answers(&assessment(), &answers).is_err());
        let answers = Answers::from([("q1".to_string(), -1)]);
        assert!(validate_answers(&assessment(), &answers).is_err());
        let answers = Answers::from([("q1".to_string(), 2)]);
        assert!(validate_answers(&assessment(), &answers).is_ok());
    }
}
