use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tool_relay::fc::{parse_tool_call_payload, strip_code_fences, ConversionPolicy};
use tool_relay::protocol::RelayMode;
use tool_relay::stream::{classify_line, Emit, StreamConverter};

fn sample_lines(tool_call: bool) -> Vec<String> {
    let text = if tool_call {
        r#"{"tool_calls":[{"type":"function","function":{"name":"get_weather","arguments":"{\"city\":\"SF\"}"}}]}"#
    } else {
        "The weather in San Francisco is mild with light fog in the morning."
    };
    let mut lines = Vec::with_capacity(text.len() / 4 + 3);
    lines.push(
        r#"data: {"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,"model":"gpt-4o-mini","choices":[{"index":0,"delta":{"role":"assistant"}}]}"#
            .to_string(),
    );
    let chars: Vec<char> = text.chars().collect();
    for piece in chars.chunks(4) {
        let piece: String = piece.iter().collect();
        let chunk = serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "created": 1,
            "model": "gpt-4o-mini",
            "choices": [{"index": 0, "delta": {"content": piece}}]
        });
        lines.push(format!("data: {chunk}"));
    }
    lines.push(String::new());
    lines.push("data: [DONE]".to_string());
    lines
}

fn run_converter(lines: &[String], policy: ConversionPolicy) -> usize {
    let mut converter = StreamConverter::new(policy);
    let mut out: Vec<Emit> = Vec::with_capacity(4);
    let mut emitted = 0;
    for line in lines {
        converter.on_line_into(line, &mut out);
        emitted += out.len();
        out.clear();
    }
    converter.finish_into(&mut out);
    emitted + out.len()
}

fn bench_converter(c: &mut Criterion) {
    let tool_lines = sample_lines(true);
    let text_lines = sample_lines(false);
    let converting = ConversionPolicy::new(true, RelayMode::ChatCompletions);
    let passthrough = ConversionPolicy::new(false, RelayMode::ChatCompletions);

    c.bench_function("converter_tool_call_stream", |b| {
        b.iter(|| run_converter(black_box(&tool_lines), converting));
    });
    c.bench_function("converter_text_stream", |b| {
        b.iter(|| run_converter(black_box(&text_lines), converting));
    });
    c.bench_function("converter_passthrough_stream", |b| {
        b.iter(|| run_converter(black_box(&text_lines), passthrough));
    });
}

fn bench_helpers(c: &mut Criterion) {
    let fenced = "```json\n{\"type\":\"function\",\"function\":{\"name\":\"f\",\"arguments\":{}}}\n```";
    c.bench_function("classify_line_data", |b| {
        b.iter(|| classify_line(black_box(r#"data: {"choices":[]}"#)));
    });
    c.bench_function("strip_code_fences", |b| {
        b.iter(|| strip_code_fences(black_box(fenced)));
    });
    c.bench_function("parse_tool_call_payload_single", |b| {
        b.iter(|| parse_tool_call_payload(black_box(fenced)));
    });
    c.bench_function("parse_tool_call_payload_rejects_prose", |b| {
        b.iter(|| parse_tool_call_payload(black_box("Sure, here is the answer.")));
    });
}

criterion_group!(benches, bench_converter, bench_helpers);
criterion_main!(benches);
