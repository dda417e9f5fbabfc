mod common;

use llama_runner::{
    FinishReason, Runner, RunnerError,
    config::{RunConfig, SamplingSeed},
    generator::GeneratorError,
    session::PromptBuilder,
};

fn prompts(texts: &[&str]) -> Vec<String> {
    texts.iter().map(|text| text.to_string()).collect()
}

#[test]
fn test_reference_prompt_within_budget() {
    let mut runner = common::runner(common::run_config());
    let (output, fragments) =
        common::collect_fragments(&mut runner, 10, common::PROMPT, None);

    assert!(output.total_tokens() <= 10);
    assert_eq!(fragments.len(), output.generated_tokens.len());
    assert_eq!(fragments.concat(), output.text);

    let (repeat, _) =
        common::collect_fragments(&mut runner, 10, common::PROMPT, None);
    assert_eq!(repeat.generated_tokens, output.generated_tokens);
}

#[test]
fn test_prompt_filling_budget_is_rejected() {
    let mut runner = common::runner(common::run_config());
    let result = runner.generate(8, common::PROMPT, None, |_| true);
    assert!(matches!(
        result,
        Err(RunnerError::Generator(
            GeneratorError::ContextLengthExceeded {
                tokens: 8,
                seq_len: 8,
            }
        ))
    ));
}

/// Prompts whose greedy continuation depends on every earlier token.
const LETTERS: &str = "a b c d e f";
const GREETING: &str = "hello there friend";

fn is_single_repeated_token(tokens: &[llama_runner::Token]) -> bool {
    tokens.windows(2).all(|pair| pair[0] == pair[1])
}

#[test]
fn test_iterations_produce_identical_text() {
    let mut runner = common::runner(common::run_config().num_iters(2));
    let report = runner
        .run_batch(&prompts(&[LETTERS]), 24, None, |_| true)
        .unwrap();

    assert_eq!(report.entries.len(), 2);
    assert_eq!(report.entries[0].iteration, 0);
    assert_eq!(report.entries[1].iteration, 1);
    let first = &report.entries[0].output;
    assert!(!first.text.is_empty());
    assert!(!is_single_repeated_token(&first.generated_tokens));
    assert_eq!(first.text, report.entries[1].output.text);
    assert_eq!(
        first.generated_tokens,
        report.entries[1].output.generated_tokens
    );
    assert!(report.failures.is_empty());
}

#[test]
fn test_sessions_do_not_leak_into_each_other() {
    let mut fresh = common::runner(common::run_config());
    let (expected, _) =
        common::collect_fragments(&mut fresh, 24, LETTERS, None);
    assert!(!is_single_repeated_token(&expected.generated_tokens));

    // A session that kept the previous prompt's context continues
    // differently over the same number of generated tokens.
    let leaked_prompt = format!("{GREETING} {LETTERS}");
    let (leaked, _) =
        common::collect_fragments(&mut fresh, 24 + 3, &leaked_prompt, None);
    assert_eq!(
        leaked.generated_tokens.len(),
        expected.generated_tokens.len()
    );
    assert_ne!(leaked.generated_tokens, expected.generated_tokens);

    let mut runner = common::runner(common::run_config());
    let report = runner
        .run_batch(&prompts(&[GREETING, LETTERS]), 24, None, |_| true)
        .unwrap();
    assert_eq!(
        report.entries[1].output.generated_tokens,
        expected.generated_tokens
    );
}

#[test]
fn test_failed_run_streams_fragments_before_the_error() {
    // "a b c d e f" fills positions 0..7, so decode passes at 7, 8 and 9
    // succeed before the one at 10 fails.
    let mut runner = common::runner_with(
        common::run_config(),
        Box::new(common::FailAtPosition::new(10, false)),
        Vec::new(),
    );
    let mut streamed = Vec::new();
    let report = runner
        .run_batch(&prompts(&[LETTERS, GREETING]), 24, None, |fragment| {
            streamed.push(fragment.to_string());
            true
        })
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].prompt_index, 0);
    assert_eq!(report.entries.len(), 1);
    let finished = &report.entries[0].output;
    assert_eq!(streamed.len(), 4 + finished.generated_tokens.len());
    assert_eq!(streamed[4..].concat(), report.text());
}

#[test]
fn test_fatal_error_after_streaming_keeps_fragments() {
    let mut runner = common::runner_with(
        common::run_config(),
        Box::new(common::FailAtPosition::new(10, true)),
        Vec::new(),
    );
    let mut streamed = Vec::new();
    let result =
        runner.run_batch(&prompts(&[LETTERS, GREETING]), 24, None, |fragment| {
            streamed.push(fragment.to_string());
            true
        });

    assert!(result.unwrap_err().is_fatal());
    assert_eq!(streamed.len(), 4);
}

#[test]
fn test_empty_system_prompt_equals_none() {
    let mut runner = common::runner(common::run_config());
    let (without, _) =
        common::collect_fragments(&mut runner, 16, common::PROMPT, None);
    let (empty, _) =
        common::collect_fragments(&mut runner, 16, common::PROMPT, Some(""));
    assert_eq!(without.prompt_tokens, empty.prompt_tokens);
    assert_eq!(without.text, empty.text);
}

#[test]
fn test_system_prompt_is_prepended() {
    let mut runner = common::runner(common::run_config());
    let (output, _) = common::collect_fragments(
        &mut runner,
        24,
        common::PROMPT,
        Some("be brief"),
    );
    // BOS, two system words, then the prompt without a second BOS.
    assert_eq!(output.prompt_tokens.len(), 1 + 2 + 7);
    assert_eq!(output.prompt_tokens[0], common::BOS_TOKEN);
    assert!(!output.prompt_tokens[1..].contains(&common::BOS_TOKEN));
}

#[test]
fn test_prompt_template_is_rendered() {
    let template =
        "{% if system_prompt %}{{ system_prompt }} | {% endif %}{{ prompt.strip() }}";
    let builder = PromptBuilder::new(Some(template.to_string())).unwrap();
    assert_eq!(
        builder.render("  hello  ", Some("sys")).unwrap().as_deref(),
        Some("sys | hello")
    );
    assert_eq!(
        builder.render("hello", None).unwrap().as_deref(),
        Some("hello")
    );

    let config =
        common::run_config().prompt_template(Some(template.to_string()));
    let mut runner = common::runner(config);
    let (output, _) =
        common::collect_fragments(&mut runner, 24, common::PROMPT, Some("sys"));
    // BOS, "sys", "|", then the prompt.
    assert_eq!(output.prompt_tokens.len(), 1 + 2 + 7);
}

#[test]
fn test_invalid_template_fails_at_construction() {
    let config =
        common::run_config().prompt_template(Some("{% if %}".to_string()));
    let result = Runner::with_components(
        config,
        common::tiny_backend(),
        Box::new(common::WordCodec::new(Vec::new())),
    );
    assert!(matches!(result, Err(RunnerError::Template(_))));
}

#[test]
fn test_cancel_stops_the_batch() {
    let mut runner = common::runner(common::run_config().num_iters(3));
    let mut calls = 0;
    let report = runner
        .run_batch(&prompts(&[common::PROMPT, "another one"]), 16, None, |_| {
            calls += 1;
            calls < 3
        })
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.entries.len(), 1);
    assert_eq!(
        report.entries[0].output.finish_reason,
        FinishReason::Cancelled
    );
    assert_eq!(calls, 3);
}

#[test]
fn test_failing_prompt_does_not_stop_the_batch() {
    let mut runner = common::runner_with(
        common::run_config(),
        Box::new(common::FailingBackend::new(false)),
        Vec::new(),
    );
    let report = runner
        .run_batch(
            &prompts(&["this will fail", common::PROMPT]),
            16,
            None,
            |_| true,
        )
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].prompt_index, 0);
    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.entries[0].prompt_index, 1);
    assert_eq!(report.entries[0].output.finish_reason, FinishReason::Length);
}

#[test]
fn test_fatal_backend_error_aborts_the_batch() {
    let mut runner = common::runner_with(
        common::run_config(),
        Box::new(common::FailingBackend::new(true)),
        Vec::new(),
    );
    let result = runner.run_batch(
        &prompts(&["this will fail", common::PROMPT]),
        16,
        None,
        |_| true,
    );
    let error = result.unwrap_err();
    assert!(error.is_fatal());
    assert!(runner.recorder().records().is_empty());
}

#[test]
fn test_seeded_sampling_is_reproducible() {
    let config = common::run_config()
        .temperature(0.8)
        .sampling_seed(SamplingSeed::Custom(1234));
    let mut first = common::runner(config.clone());
    let mut second = common::runner(config);
    let (first_output, _) =
        common::collect_fragments(&mut first, 24, common::PROMPT, None);
    let (second_output, _) =
        common::collect_fragments(&mut second, 24, common::PROMPT, None);
    assert_eq!(first_output.generated_tokens, second_output.generated_tokens);
}

#[test]
fn test_performance_log_has_line_per_run() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("inference_speed.txt");
    let config = common::run_config()
        .num_iters(2)
        .performance_output_path(Some(path.clone()));
    let mut runner = common::runner(config);
    let report = runner
        .run_batch(&prompts(&[common::PROMPT, "hello"]), 16, None, |_| true)
        .unwrap();

    let summary = report.summary.unwrap();
    assert_eq!(summary.runs, 4);
    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 4 + 2);
    assert!(lines[..4].iter().all(|line| line.starts_with("run ")));
    assert!(lines[5].starts_with("decode_tokens_per_second="));
}

#[test]
fn test_runner_loads_artifacts_from_disk() {
    let directory = tempfile::tempdir().unwrap();
    let shards = [
        directory.path().join("model-00001.safetensors"),
        directory.path().join("model-00002.safetensors"),
    ];
    let tokenizer_path = directory.path().join("tokenizer.json");
    common::tiny_weights().write_shards(&shards).unwrap();
    common::write_tokenizer(&tokenizer_path);

    let config = RunConfig::new(shards.to_vec(), tokenizer_path);
    let mut runner = Runner::new(config).unwrap();
    assert_eq!(runner.model_config(), &common::tiny_config());

    let mut fragments = Vec::new();
    let output = runner
        .generate(12, common::PROMPT, None, |fragment| {
            fragments.push(fragment.to_string());
            true
        })
        .unwrap();
    assert!(output.total_tokens() <= 12);
    assert_eq!(fragments.concat(), output.text);
    // The file tokenizer knows "<s>" so the prompt starts with BOS.
    assert_eq!(output.prompt_tokens[0], 0);
}

#[test]
fn test_missing_artifacts_fail_setup() {
    let config = RunConfig::new(
        vec!["/nonexistent/model.safetensors".into()],
        "/nonexistent/tokenizer.json".into(),
    );
    assert!(matches!(Runner::new(config), Err(RunnerError::Config(_))));
}
