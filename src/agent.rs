use std::time::Instant;

use crate::{
    chart::create_chartjs_data,
    csv_table::Table,
    error::Error,
    llama::TextCompletion,
    models::{AgentResponse, ChartType},
    settings::AgentSettings,
};

/// Error code reported to clients whenever the agent could not produce a chart.
pub const UNEXPECTED_ERROR: &str = "UNEXPECTED_ERROR";

const SECONDS_IN_YEAR: f64 = 365.0 * 24.0 * 3600.0;

/// Asks a language model how to plot a table, then builds the chart data.
pub struct DataPlottingAgent {
    llm: Box<dyn TextCompletion>,
    /// Cost of one second of inference, in cents.
    second_compute_cost: f64,
}

/// Maps every needle to the byte offset of its first occurrence in
/// `response`, leaving out needles that are empty or do not occur. The result
/// is ordered by offset, earliest first.
pub fn find_substrings_in_response<'a, I>(response: &str, needles: I) -> Vec<(&'a str, usize)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut found: Vec<(&'a str, usize)> = needles
        .into_iter()
        .filter(|n| !n.is_empty())
        .filter_map(|n| response.find(n).map(|pos| (n, pos)))
        .collect();
    found.sort_by_key(|(_, pos)| *pos);
    found
}

/// Cuts the response at its last comma, which tends to drop the half-finished
/// list of column names the model ends with.
pub fn shorten_response(s: &str) -> &str {
    match s.rfind(',') {
        Some(idx) => &s[..idx],
        None => s,
    }
}

fn build_prompt(table: &Table, user_prompt: &str) -> String {
    format!(
        "You are an expert data analyst.\n\
         Data with column names: {}\n\
         User prompt: {user_prompt}.\n\
         Question: What chart type (bar, line or pie) would you use for Data and what column names would you use for the User prompt?\n\
         Answer: ",
        table.preview()
    )
}

impl DataPlottingAgent {
    pub fn new(llm: Box<dyn TextCompletion>, settings: &AgentSettings) -> Self {
        DataPlottingAgent {
            llm,
            second_compute_cost: settings.yearly_compute_cost_cents / SECONDS_IN_YEAR,
        }
    }

    /// Cost in cents of running inference for `seconds`.
    pub fn compute_cost(&self, seconds: f64) -> f64 {
        self.second_compute_cost * seconds
    }

    fn plot(&self, table: &Table, user_prompt: &str) -> Result<AgentResponse, Error> {
        let prompt = build_prompt(table, user_prompt);

        let start = Instant::now();
        let raw = self.llm.complete(&prompt, &[])?;
        let cost = self.compute_cost(start.elapsed().as_secs_f64());

        log::info!("LLM Cost: ${} dollars", cost / 100.0);
        log::debug!("Raw LLM Response: {raw}");

        let chart_type = find_substrings_in_response(
            &raw,
            ChartType::SUGGESTIBLE.iter().map(ChartType::as_str),
        )
        .first()
        .and_then(|(name, _)| {
            ChartType::SUGGESTIBLE
                .into_iter()
                .find(|ct| ct.as_str() == *name)
        })
        .ok_or_else(|| Error::from("The model did not suggest a chart type"))?;

        let column_names: Vec<String> =
            find_substrings_in_response(&raw, table.columns.iter().map(String::as_str))
                .into_iter()
                .map(|(name, _)| name.to_string())
                .collect();

        log::debug!("Plotting {chart_type} chart of columns {column_names:?}");
        let chart_data = create_chartjs_data(table, &column_names, chart_type)?;

        Ok(AgentResponse {
            chart_data: Some(chart_data),
            summary: shorten_response(&raw).to_string(),
            error: None,
        })
    }

    /// Produces chart data for `table` as asked for by `user_prompt`. Failures
    /// are reported inside the response rather than as an error.
    pub fn process_data_and_plot(&self, table: &Table, user_prompt: &str) -> AgentResponse {
        self.plot(table, user_prompt).unwrap_or_else(|e| {
            log::warn!("An unexpected error occurred during data processing: {e}");
            AgentResponse {
                chart_data: None,
                summary: format!("An unexpected error occurred: {e}"),
                error: Some(UNEXPECTED_ERROR.to_string()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv_table::parse_csv;
    use crate::models::Datum;
    use asserting::prelude::*;
    use std::sync::Mutex;

    /// Answers every prompt with the same text and remembers the prompts.
    struct CannedCompletion {
        answer: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedCompletion {
        fn answering(answer: &str) -> Self {
            CannedCompletion {
                answer: Ok(answer.to_string()),
                prompts: Mutex::new(vec![]),
            }
        }
    }

    impl TextCompletion for CannedCompletion {
        fn complete(&self, prompt: &str, _stop: &[String]) -> Result<String, Error> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.answer.clone().map_err(Error::from)
        }
    }

    fn agent(answer: &str) -> DataPlottingAgent {
        DataPlottingAgent::new(
            Box::new(CannedCompletion::answering(answer)),
            &AgentSettings {
                yearly_compute_cost_cents: 1500.0,
            },
        )
    }

    fn sales() -> Table {
        parse_csv(b"year,sales\n2020,4\n2021,8\n2020,6\n").unwrap()
    }

    #[test]
    fn test_find_substrings_ordered_by_position() {
        let found = find_substrings_in_response("use a line chart, not bar", ["bar", "line", "pie"]);
        assert_that!(found).is_equal_to(vec![("line", 6usize), ("bar", 22usize)]);
    }

    #[test]
    fn test_find_substrings_skips_empty_needles() {
        let found = find_substrings_in_response("a bar chart", ["", "bar"]);
        assert_that!(found).is_equal_to(vec![("bar", 2usize)]);
    }

    #[test]
    fn test_plot_with_trailing_comma_in_header() {
        let table = parse_csv(b"year,sales,\n2020,4,x\n2021,8,y\n").unwrap();
        let resp = agent("A bar chart of year and sales").process_data_and_plot(&table, "sales");
        let chart = resp.chart_data.unwrap();
        assert_that!(chart.labels_key.clone()).is_equal_to("year");
        assert_that!(chart.values_key.clone()).is_equal_to("sales");
        assert_that!(chart.data.len()).is_equal_to(2);
    }

    #[test]
    fn test_shorten_response() {
        assert_that!(shorten_response("bar chart, year, sales")).is_equal_to("bar chart, year");
        assert_that!(shorten_response("no commas")).is_equal_to("no commas");
    }

    #[test]
    fn test_compute_cost() {
        let a = agent("");
        let per_hour = a.compute_cost(3600.0);
        assert!((per_hour - 1500.0 / (365.0 * 24.0)).abs() < 1e-9);
    }

    #[test]
    fn test_plot_bar_chart() {
        let resp = agent("A bar chart with sales per year, done").process_data_and_plot(&sales(), "sales by year");
        assert_that!(resp.error.clone()).is_equal_to(None::<String>);
        assert_that!(resp.summary.clone()).is_equal_to("A bar chart with sales per year");
        let chart = resp.chart_data.unwrap();
        assert_that!(chart.chart_type).is_equal_to(ChartType::Bar);
        // "sales" is mentioned before "year", so it becomes the labels column.
        assert_that!(chart.labels_key.clone()).is_equal_to("sales");
        assert_that!(chart.values_key.clone()).is_equal_to("year");
        assert_that!(chart.data.len()).is_equal_to(3);
    }

    #[test]
    fn test_plot_uses_earliest_chart_type() {
        let resp = agent("line: year, sales. A bar chart also works")
            .process_data_and_plot(&sales(), "trend");
        let chart = resp.chart_data.unwrap();
        assert_that!(chart.chart_type).is_equal_to(ChartType::Line);
        assert_that!(chart.labels_key.clone()).is_equal_to("year");
        assert_that!(chart.data[0]["sales"].clone()).is_equal_to(Datum::Float(5.0));
    }

    #[test]
    fn test_plot_without_chart_type() {
        let resp = agent("I do not know").process_data_and_plot(&sales(), "anything");
        assert_that!(resp.chart_data.is_none()).is_equal_to(true);
        assert_that!(resp.error).is_equal_to(Some(UNEXPECTED_ERROR.to_string()));
        assert_that!(resp.summary).starts_with("An unexpected error occurred:");
    }

    #[test]
    fn test_plot_without_columns() {
        let resp = agent("a pie chart").process_data_and_plot(&sales(), "anything");
        assert_that!(resp.error).is_equal_to(Some(UNEXPECTED_ERROR.to_string()));
        assert_that!(resp.summary).contains("column_names cannot be empty.");
    }

    #[test]
    fn test_llm_failure_is_reported() {
        let a = DataPlottingAgent::new(
            Box::new(CannedCompletion {
                answer: Err("llama-cli crashed".to_string()),
                prompts: Mutex::new(vec![]),
            }),
            &AgentSettings {
                yearly_compute_cost_cents: 1500.0,
            },
        );
        let resp = a.process_data_and_plot(&sales(), "anything");
        assert_that!(resp.summary).contains("llama-cli crashed");
    }

    #[test]
    fn test_prompt_contains_preview_and_request() {
        let llm = CannedCompletion::answering("bar, year, sales");
        let prompt = build_prompt(&sales(), "sales by year");
        llm.complete(&prompt, &[]).unwrap();
        let seen = llm.prompts.lock().unwrap()[0].clone();
        assert_that!(seen.clone()).contains("Data with column names: year sales\n2020 4");
        assert_that!(seen.clone()).contains("User prompt: sales by year.");
        assert_that!(seen).ends_with("Answer: ");
    }
}
