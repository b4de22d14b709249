use burn_char_gpt::{CharVocab, Gpt, GptConfig, SampleOptions, sample_text, sample_tokens};
use burn_ndarray::NdArray;

type Backend = NdArray<f32>;

fn small_model() -> (Gpt<Backend>, <Backend as burn::tensor::backend::Backend>::Device) {
    let device = Default::default();
    let config = GptConfig {
        vocab_size: 11,
        block_size: 8,
        n_layer: 1,
        n_head: 2,
        n_embd: 8,
        dropout: 0.0,
    };
    (Gpt::new(&config, &device), device)
}

fn greedy() -> SampleOptions {
    SampleOptions {
        temperature: 1.0,
        top_k: None,
        sample: false,
    }
}

#[test]
fn output_has_exactly_the_requested_length() {
    let (model, device) = small_model();
    for length in [0, 1, 5, 20] {
        let out = sample_tokens(&model, &[1, 2, 3], length, greedy(), &device).expect("sample");
        assert_eq!(out.len(), length);
    }
}

#[test]
fn generated_codes_are_in_vocabulary_range() {
    let (model, device) = small_model();
    let out = sample_tokens(&model, &[0], 32, greedy(), &device).expect("sample");
    assert!(out.iter().all(|&code| (code as usize) < model.vocab_size()));
}

#[test]
fn greedy_decoding_is_deterministic() {
    let (model, device) = small_model();
    let first = sample_tokens(&model, &[4, 2], 12, greedy(), &device).expect("sample");
    let second = sample_tokens(&model, &[4, 2], 12, greedy(), &device).expect("sample");
    assert_eq!(first, second);
}

#[test]
fn top_k_one_collapses_sampling_to_greedy() {
    let (model, device) = small_model();
    let options = SampleOptions {
        temperature: 1.0,
        top_k: Some(1),
        sample: true,
    };
    let sampled = sample_tokens(&model, &[4, 2], 12, options, &device).expect("sample");
    let argmaxed = sample_tokens(&model, &[4, 2], 12, greedy(), &device).expect("sample");
    assert_eq!(sampled, argmaxed);
}

#[test]
fn temperature_does_not_change_greedy_choices() {
    let (model, device) = small_model();
    let hot = SampleOptions {
        temperature: 2.5,
        ..greedy()
    };
    let cool = SampleOptions {
        temperature: 0.25,
        ..greedy()
    };
    let a = sample_tokens(&model, &[7], 10, hot, &device).expect("sample");
    let b = sample_tokens(&model, &[7], 10, cool, &device).expect("sample");
    assert_eq!(a, b);
}

#[test]
fn context_longer_than_block_size_is_truncated_not_rejected() {
    let (model, device) = small_model();
    // seed of 20 codes against block_size 8
    let seed: Vec<u32> = (0..20).map(|i| i % 11).collect();
    let out = sample_tokens(&model, &seed, 4, greedy(), &device).expect("sample");
    assert_eq!(out.len(), 4);
}

#[test]
fn empty_seed_is_an_error() {
    let (model, device) = small_model();
    assert!(sample_tokens(&model, &[], 3, greedy(), &device).is_err());
}

#[test]
fn invalid_options_are_rejected() {
    let (model, device) = small_model();
    let zero_temp = SampleOptions {
        temperature: 0.0,
        ..SampleOptions::default()
    };
    assert!(sample_tokens(&model, &[1], 3, zero_temp, &device).is_err());

    let zero_k = SampleOptions {
        top_k: Some(0),
        ..SampleOptions::default()
    };
    assert!(sample_tokens(&model, &[1], 3, zero_k, &device).is_err());
}

#[test]
fn sample_text_returns_only_the_continuation() {
    let (model, device) = small_model();
    let vocab = CharVocab::fit("abcdefghijk").expect("vocab");
    assert_eq!(vocab.len(), 11);

    let out = sample_text(&model, &vocab, "abc", 6, greedy(), &device).expect("sample");
    assert_eq!(out.chars().count(), 6);
    assert!(out.chars().all(|ch| vocab.contains(ch)));
}

#[test]
fn unknown_prompt_character_is_an_error() {
    let (model, device) = small_model();
    let vocab = CharVocab::fit("abcdefghijk").expect("vocab");
    assert!(sample_text(&model, &vocab, "xyz!", 3, greedy(), &device).is_err());
}
