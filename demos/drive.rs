use async_generator_engine::*;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(clap::Parser)]
#[command(name = "drive", version, about = "Drive a scripted async generator with a list of requests")]
struct Cli {
    /// Generator body as a JSON array, e.g. '[{"yield": 1}, {"await": 2}, "yieldReceived"]'
    #[arg(short, long)]
    body: Option<String>,

    /// File holding the generator body
    #[arg(short, long, conflicts_with = "body")]
    file: Option<std::path::PathBuf>,

    /// Comma-separated requests: next, next:<json>, return:<json>, throw:<json>
    #[arg(short, long, default_value = "next")]
    requests: String,

    /// Maximum number of queued tasks to run (0 = unlimited)
    #[arg(long, default_value_t = 1_000_000)]
    task_limit: usize,
}

fn parse_request(text: &str) -> Result<(String, Value), JSError> {
    let (method, payload) = match text.split_once(':') {
        Some((method, payload)) => (method.trim(), parse_json_value(payload.trim())?),
        None => (text.trim(), Value::Undefined),
    };
    match method {
        "next" | "return" | "throw" => Ok((method.to_string(), payload)),
        other => Err(JSError::SyntaxError {
            message: format!("unknown request \"{other}\", expected next, return or throw"),
        }),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger (controlled by RUST_LOG)
    env_logger::init();

    let cli = <Cli as clap::Parser>::parse();
    let body = match (cli.body, cli.file.as_ref()) {
        (Some(body), _) => body,
        (None, Some(file)) => std::fs::read_to_string(file)?,
        (None, None) => "[]".to_string(),
    };
    set_event_loop_task_limit(cli.task_limit);

    let generator = new_async_generator(ScriptedBody::new(instructions_from_json(&body)?));
    let requests = cli
        .requests
        .split(',')
        .filter(|r| !r.trim().is_empty())
        .map(parse_request)
        .collect::<Result<Vec<_>, _>>()?;

    // Settlement order, recorded by reactions on every returned promise.
    let settled: Rc<RefCell<Vec<usize>>> = Rc::default();
    let mut promises = Vec::with_capacity(requests.len());
    for (index, (method, payload)) in requests.iter().enumerate() {
        let promise = handle_async_generator_prototype_method(method, Some(&generator), std::slice::from_ref(payload))?;
        let record = |settled: Rc<RefCell<Vec<usize>>>| {
            new_native_function("record", move |_this, _args| {
                settled.borrow_mut().push(index);
                Ok(Value::Undefined)
            })
        };
        promise_then(&promise, record(settled.clone()), record(settled.clone()))?;
        promises.push(promise);
    }

    let tasks = run_event_loop()?;
    log::debug!("drive: ran {} tasks", tasks);

    for index in settled.borrow().iter() {
        let (method, payload) = &requests[*index];
        let argument = js_value_to_json_value(payload).map(|v| v.to_string()).unwrap_or_default();
        println!("[{index}] {method}({argument}) -> {}", settlement_to_json(&promises[*index]));
    }
    for (index, promise) in promises.iter().enumerate() {
        if !settled.borrow().contains(&index) {
            println!("[{index}] {} -> {}", requests[index].0, settlement_to_json(promise));
        }
    }
    if let Some(state) = async_generator_state(&generator) {
        println!("final state: {state:?}");
    }
    Ok(())
}
