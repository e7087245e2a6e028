use anyhow::{Context, Result};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use bazi_oracle::{AnalysisMode, AnalysisResponse, ChatMessage, Config, FortuneAnalyzer, UserInput};

// 请求文件结构
#[derive(Debug, Deserialize)]
struct RequestFile {
    person: Option<UserInput>,
    partner: Option<UserInput>,
    #[serde(default)]
    questions: Vec<String>,
}

fn print_usage() {
    println!("用法: bazi-oracle <basic|yearly|scholarly|compat|chat|daily> [request.toml]");
    println!("   request.toml 需包含 [person]，合盤另需 [partner]，對話需 questions = [...]");
}

fn load_request(path: &str) -> Result<RequestFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("請求文件 {} 不存在或無法讀取", path))?;
    toml::from_str(&content).with_context(|| format!("請求文件 {} 解析失敗", path))
}

fn print_reading(result: &AnalysisResponse) {
    println!("\n📜 {}", result.summary);
    println!("🎯 評分: {:.0}", result.score);
    let r = &result.radar;
    println!(
        "📊 事業 {:.0} ｜ 財運 {:.0} ｜ 感情 {:.0} ｜ 健康 {:.0} ｜ 人際 {:.0} ｜ 家庭 {:.0}",
        r.career, r.wealth, r.love, r.health, r.social, r.family
    );
    println!("\n{}\n\n{}", result.classical, result.modern);
    for tip in &result.luck_tips {
        println!("🧧 {}: {}", tip.title, tip.content);
    }
    for question in &result.suggested_questions {
        println!("❓ {}", question);
    }
    if let Some(model) = &result.used_model {
        println!("\n🤖 使用模型: {}", model);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bazi_oracle=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        print_usage();
        return Ok(());
    };

    println!("🔮 八字命理大師");
    let config = Config::load()?;
    let analyzer = FortuneAnalyzer::new(config)?;

    if command == "daily" {
        let fortune = analyzer.draw_daily_fortune(None).await?;
        println!("🎨 幸運色: {}", fortune.lucky_color);
        println!("🔢 幸運數字: {}", fortune.lucky_number);
        println!("🧭 吉方: {}", fortune.lucky_direction);
        println!("📜 {}", fortune.quote);
        println!("💡 {}", fortune.advice);
        return Ok(());
    }

    let request_path = args.get(1).map(String::as_str).unwrap_or("request.toml");
    let request = load_request(request_path)?;
    let person = request.person.context("請求文件缺少 [person]")?;

    match command.as_str() {
        "chat" => {
            println!("📖 先進行本命論命，再開始對話...");
            let reading = analyzer.analyze_reading(&person, AnalysisMode::Basic, None).await?;
            println!("📜 {}", reading.summary);

            let mut history: Vec<ChatMessage> = Vec::new();
            for question in &request.questions {
                println!("\n🙋 {}", question);
                let reply = analyzer.continue_chat(&history, question, &reading, None).await?;
                println!("🧙 {}", reply);
                history.push(ChatMessage::user(question.clone()));
                history.push(ChatMessage::model(reply));
            }
        }
        other => {
            let mode: AnalysisMode = other.parse().map_err(anyhow::Error::msg)?;
            println!("📖 分析模式: {}", mode.label());
            let result = if mode.is_pair() {
                let partner = request.partner.context("雙人合盤需要 [partner]")?;
                analyzer.analyze_compatibility(&person, &partner, None).await?
            } else {
                analyzer.analyze_reading(&person, mode, None).await?
            };
            print_reading(&result);
        }
    }

    println!("\n🎉 完成！");
    Ok(())
}
