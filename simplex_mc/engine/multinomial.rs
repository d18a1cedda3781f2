use crate::{
    consumer::Consumer,
    error::SimResult,
    rng::RandomEngine,
    simplex_generator::Simplex,
};

/// Draws `loop_count` multinomial outcomes of `entry_count` events each.
#[derive(Debug, Clone)]
pub struct MultinomialSampler {
    entry_count: u64,
    loop_count: u64,
    outcome: Vec<u64>,
}

impl MultinomialSampler {
    /// Creates a sampler for `entry_count` events per draw and `loop_count` draws.
    #[must_use]
    pub const fn new(entry_count: u64, loop_count: u64) -> Self {
        Self {
            entry_count,
            loop_count,
            outcome: Vec::new(),
        }
    }

    /// Changes the events per draw (entry-count sweeps).
    pub fn set_entry_count(&mut self, entry_count: u64) {
        self.entry_count = entry_count;
    }

    /// Events per draw.
    #[must_use]
    pub const fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Draws per run.
    #[must_use]
    pub const fn loop_count(&self) -> u64 {
        self.loop_count
    }

    /// Performs every draw on the calling thread, handing each outcome to `consumer` in order.
    pub fn run(
        &mut self,
        simplex: &Simplex,
        engine: &mut dyn RandomEngine,
        consumer: &mut dyn Consumer,
    ) -> SimResult<()> {
        self.outcome.clear();
        self.outcome.resize(simplex.len(), 0);
        for _ in 0..self.loop_count {
            engine.multinomial(self.entry_count, simplex.probabilities(), &mut self.outcome)?;
            consumer.accept(&self.outcome, engine)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{consumer::Estimate, rng::ChaChaEngine};

    #[derive(Default)]
    struct Tally {
        draws: Vec<Vec<u64>>,
    }

    impl Consumer for Tally {
        fn init(&mut self) {
            self.draws.clear();
        }

        fn accept(&mut self, outcome: &[u64], _: &mut dyn RandomEngine) -> SimResult<()> {
            self.draws.push(outcome.to_vec());
            Ok(())
        }

        fn finish(&mut self) -> Estimate {
            Estimate::default()
        }
    }

    #[test]
    fn performs_exactly_loop_count_draws() {
        let simplex = Simplex::new(vec![0.1, 0.2, 0.4, 0.2, 0.1]).unwrap();
        let mut sampler = MultinomialSampler::new(25, 13);
        let mut engine = ChaChaEngine::new(6);
        let mut tally = Tally::default();
        sampler.run(&simplex, &mut engine, &mut tally).unwrap();
        assert_eq!(tally.draws.len(), 13);
        for draw in &tally.draws {
            assert_eq!(draw.len(), 5);
            assert_eq!(draw.iter().sum::<u64>(), 25);
        }
    }

    #[test]
    fn entry_count_can_change_between_runs() {
        let simplex = Simplex::new(vec![0.3, 0.4, 0.3]).unwrap();
        let mut sampler = MultinomialSampler::new(10, 2);
        let mut engine = ChaChaEngine::new(6);
        let mut tally = Tally::default();
        sampler.set_entry_count(17);
        sampler.run(&simplex, &mut engine, &mut tally).unwrap();
        assert!(tally.draws.iter().all(|draw| draw.iter().sum::<u64>() == 17));
        assert_eq!(sampler.entry_count(), 17);
        assert_eq!(sampler.loop_count(), 2);
    }
}
