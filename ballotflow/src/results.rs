use crate::*;
use indexmap::IndexMap;
use log::info;
use tallystick::plurality::DefaultPluralityTally;

/// Counts of one question, by option value
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QuestionResult {
    pub question: String,
    pub tally: IndexMap<u32, u64>,
}

impl QuestionResult {
    pub fn total(&self) -> u64 {
        self.tally.values().sum()
    }
}

/// Per-question results of a process, as computed by the network
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ResultsDigest {
    pub questions: Vec<QuestionResult>,
}

impl ResultsDigest {
    /// Tally the given vote vectors against the process questions.
    ///
    /// Every declared option appears in the result, with zero if nobody chose it.
    pub fn compute(questions: &[Question], votes: &[Vec<u32>]) -> Self {
        let questions = questions
            .iter()
            .enumerate()
            .map(|(index, question)| {
                let mut plurality = DefaultPluralityTally::new(1);
                for vote in votes {
                    if let Some(&choice) = vote.get(index) {
                        plurality.add(choice);
                    }
                }

                let mut tally: IndexMap<u32, u64> = question
                    .vote_options
                    .iter()
                    .map(|option| (option.value, 0))
                    .collect();
                for (choice, count) in plurality.totals() {
                    *tally.entry(choice).or_insert(0) += count;
                }

                QuestionResult {
                    question: question.title(),
                    tally,
                }
            })
            .collect();

        ResultsDigest { questions }
    }
}

/// Results of a process together with its state when they were read
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Tally {
    pub process_id: ProcessId,
    pub state: ProcessState,
    pub questions: Vec<QuestionResult>,
}

impl Tally {
    /// Whether no more votes can be counted: the process is closed or canceled.
    ///
    /// While the process is open the counts are only a partial view.
    pub fn is_final(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Read back the results of a process
pub async fn tally<G: NetworkGateway + ?Sized>(
    gateway: &G,
    process_id: ProcessId,
) -> Result<Tally, Error> {
    let state = current_state(gateway, process_id).await?;
    let digest = gateway.results_digest(process_id).await?;

    let tally = Tally {
        process_id,
        state,
        questions: digest.questions,
    };
    if tally.is_final() {
        info!("Process results: {:?}", tally.questions);
    } else {
        info!("Partial process results ({}): {:?}", state, tally.questions);
    }
    Ok(tally)
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_compute_digest() {
        let options = ["Yellow", "Pink", "Abstention", "White"];
        let questions = vec![
            Question::single_choice("CEO", "Chief Executive Officer", &options),
            Question::single_choice("CFO", "Chief Financial Officer", &options),
        ];
        let votes = vec![vec![1, 2], vec![1, 2], vec![0, 2], vec![1, 3]];

        let digest = ResultsDigest::compute(&questions, &votes);
        assert_eq!(digest.questions.len(), 2);

        let ceo = &digest.questions[0];
        assert_eq!(ceo.question, "CEO");
        assert_eq!(ceo.tally[&0], 1);
        assert_eq!(ceo.tally[&1], 3);
        assert_eq!(ceo.tally[&2], 0);
        assert_eq!(ceo.tally[&3], 0);
        assert_eq!(ceo.total(), 4);

        let cfo = &digest.questions[1];
        assert_eq!(cfo.tally[&2], 3);
        assert_eq!(cfo.tally[&3], 1);
        assert_eq!(cfo.total(), 4);

        // Option order follows the ballot
        let keys: Vec<u32> = cfo.tally.keys().copied().collect();
        assert_eq!(keys, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_empty_digest() {
        let questions = vec![Question::single_choice("Q", "", &["yes", "no"])];
        let digest = ResultsDigest::compute(&questions, &[]);
        assert_eq!(digest.questions[0].total(), 0);
        assert_eq!(digest.questions[0].tally.len(), 2);
    }
}
