use crate::domain::models::Exercise;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;

/// Ordered exercises chosen for one run of a break.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SessionPlan {
    exercises: Vec<Exercise>,
}

impl SessionPlan {
    /// Shuffles the catalog and greedily keeps every exercise that still fits
    /// the remaining budget. Not a knapsack: callers rely on this policy.
    pub fn build<R: Rng + ?Sized>(catalog: &[Exercise], budget_seconds: u32, rng: &mut R) -> Self {
        let mut shuffled = catalog.to_vec();
        shuffled.shuffle(rng);

        let mut selected = Vec::new();
        let mut accumulated = 0u32;
        for exercise in &shuffled {
            if accumulated >= budget_seconds {
                break;
            }
            let next = accumulated.saturating_add(exercise.duration_seconds);
            if next <= budget_seconds {
                accumulated = next;
                selected.push(exercise.clone());
            }
        }

        if selected.is_empty() {
            if let Some(shortest) = shuffled
                .iter()
                .min_by_key(|exercise| exercise.duration_seconds)
                .filter(|exercise| exercise.duration_seconds <= budget_seconds)
            {
                selected.push(shortest.clone());
            }
        }

        Self {
            exercises: selected,
        }
    }

    pub fn from_exercises(exercises: Vec<Exercise>) -> Self {
        Self { exercises }
    }

    pub fn is_empty(&self) -> bool {
        self.exercises.is_empty()
    }

    pub fn len(&self) -> usize {
        self.exercises.len()
    }

    pub fn get(&self, index: usize) -> Option<&Exercise> {
        self.exercises.get(index)
    }

    pub fn exercises(&self) -> &[Exercise] {
        &self.exercises
    }

    pub fn total_seconds(&self) -> u32 {
        self.exercises
            .iter()
            .fold(0u32, |total, exercise| total.saturating_add(exercise.duration_seconds))
    }

    /// Seconds of every slot after `index`.
    pub fn seconds_after(&self, index: usize) -> u32 {
        self.exercises
            .iter()
            .skip(index.saturating_add(1))
            .fold(0u32, |total, exercise| total.saturating_add(exercise.duration_seconds))
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.exercises.iter().any(|exercise| exercise.name == name)
    }

    /// Random catalog entry whose name is not already in the plan.
    pub fn pick_replacement<R: Rng + ?Sized>(&self, catalog: &[Exercise], rng: &mut R) -> Option<Exercise> {
        let used = self
            .exercises
            .iter()
            .map(|exercise| exercise.name.as_str())
            .collect::<HashSet<_>>();
        let candidates = catalog
            .iter()
            .filter(|exercise| !used.contains(exercise.name.as_str()))
            .collect::<Vec<_>>();
        candidates.choose(rng).map(|exercise| (*exercise).clone())
    }

    pub fn replace(&mut self, index: usize, exercise: Exercise) -> Option<Exercise> {
        let slot = self.exercises.get_mut(index)?;
        Some(std::mem::replace(slot, exercise))
    }
}
