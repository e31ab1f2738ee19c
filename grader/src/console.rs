//! Terminal reviewer
//!
//! Puts review questions to the grader at the terminal with dialoguer.
//! Prompts block, so each question runs on the blocking pool.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Select};

use crate::grading::Reviewer;
use crate::outcome::TestIdentity;
use crate::scoring::{Resolution, Review, ReviewAnswer};

const DEFER_ITEM: &str = "Defer (decide later)";

pub struct ConsoleReviewer;

#[async_trait]
impl Reviewer for ConsoleReviewer {
    async fn ask(&mut self, test: &TestIdentity, review: &Review) -> Result<Option<ReviewAnswer>> {
        let test = test.clone();
        let review = review.clone();
        tokio::task::spawn_blocking(move || prompt(&test, &review))
            .await
            .context("Review prompt panicked")?
    }
}

/// Header, question and evidence shown before the options
pub fn render_question(test: &TestIdentity, review: &Review) -> String {
    let mut text = format!("===== {} ({} pts)", test.name, test.total_pts);
    if !test.description.is_empty() {
        text.push_str(&format!("\n{}", test.description));
    }
    if !review.evidence.is_empty() {
        text.push_str(&format!("\n{}", review.evidence.trim_end()));
    }
    text.push_str(&format!("\n{}", review.question));
    text
}

/// Menu entries, one per option plus the defer entry
pub fn option_items(review: &Review) -> Vec<String> {
    let mut items: Vec<String> = review
        .options
        .iter()
        .map(|opt| {
            if opt.explanation.is_empty() {
                format!("[{}] {}", opt.score, opt.text)
            } else {
                format!("[{}] {} ({})", opt.score, opt.text, opt.explanation)
            }
        })
        .collect();
    items.push(DEFER_ITEM.to_string());
    items
}

fn prompt(test: &TestIdentity, review: &Review) -> Result<Option<ReviewAnswer>> {
    let theme = ColorfulTheme::default();
    println!("{}", render_question(test, review));

    let items = option_items(review);
    let choice = loop {
        let choice = Select::with_theme(&theme)
            .with_prompt("Choose")
            .items(&items)
            .default(0)
            .interact()?;
        if choice >= review.options.len() {
            return Ok(None);
        }
        match &review.options[choice].concern {
            Some(concern) => {
                let sure = Confirm::with_theme(&theme)
                    .with_prompt(format!("{}. Choose it anyway?", concern))
                    .default(false)
                    .interact()?;
                if sure {
                    break choice;
                }
            }
            None => break choice,
        }
    };

    let option = &review.options[choice];
    let mut answer = ReviewAnswer::choose(choice);
    if let Resolution::Requirement { deduction, .. } = review.resolution {
        if choice != 0 {
            let given: i32 = Input::with_theme(&theme)
                .with_prompt(format!("Deduction (0..={})", deduction))
                .default(deduction)
                .interact_text()?;
            answer = answer.with_deduction(given);
        }
    }
    let wants_comment = option.asks_comment || answer.deduction.is_some_and(|d| d != option_deduction(review));
    let comment: String = Input::with_theme(&theme)
        .with_prompt(if wants_comment { "Comment" } else { "Comment (optional)" })
        .allow_empty(!wants_comment)
        .interact_text()?;
    if !comment.trim().is_empty() {
        answer = answer.with_comment(comment);
    }
    Ok(Some(answer))
}

fn option_deduction(review: &Review) -> i32 {
    match review.resolution {
        Resolution::Requirement { deduction, .. } => deduction,
        _ => 0,
    }
}
