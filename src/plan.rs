//! Query Plan Builder
//!
//! Pure mapping from an analysis request to the system instruction, the
//! user prompt and the output schema sent to the model. Nothing here does
//! I/O, so every prompt and schema variant can be checked offline.

use chrono::NaiveDate;
use serde_json::{Value, json};

use crate::config::AnalysisConfig;
use crate::error::{OracleError, OracleResult};
use crate::models::{AnalysisMode, AnalysisResponse, CalendarType, UserInput};

const STEMS: [&str; 10] = ["甲", "乙", "丙", "丁", "戊", "己", "庚", "辛", "壬", "癸"];
const BRANCHES: [&str; 12] = ["子", "丑", "寅", "卯", "辰", "巳", "午", "未", "申", "酉", "戌", "亥"];

/// Marker placed on every schema field that depends on an unknown birth hour.
pub const UNRELIABLE_HOUR_NOTE: &str =
    "時辰不詳：此柱僅為占位推估，不可靠，不得作為任何論斷依據，可回傳 null";

/// Disclosure the narrative must carry when any birth hour is unknown.
pub const REDUCED_CONFIDENCE_DISCLOSURE: &str =
    "必須在 classical 與 modern 的開頭明確聲明：因時辰不詳，僅以年、月、日三柱論命，準確度有所折損。";

/// Everything needed to issue one structured request.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub system_instruction: String,
    pub prompt: String,
    pub schema: Value,
    pub temperature: Option<f32>,
}

/// What to analyze. Compatibility is the only variant carrying two people.
#[derive(Debug, Clone, Copy)]
pub enum PlanRequest<'a> {
    Reading { mode: AnalysisMode, input: &'a UserInput },
    Compatibility { first: &'a UserInput, second: &'a UserInput },
}

impl PlanRequest<'_> {
    pub fn mode(&self) -> AnalysisMode {
        match self {
            PlanRequest::Reading { mode, .. } => *mode,
            PlanRequest::Compatibility { .. } => AnalysisMode::Compatibility,
        }
    }
}

// 各模式的差异：叙事重点、score 含义、六维含义
struct ModeProfile {
    persona: &'static str,
    emphasis: String,
    score_meaning: String,
    radar_meaning: String,
    radar_axes: [(&'static str, String); 6],
    luck_tips: String,
    questions: &'static str,
    classical_style: &'static str,
    modern_style: String,
}

/// 以 1984 甲子年为基准推算年份干支
pub fn sexagenary_year(year: i32) -> String {
    let offset = year - 1984;
    let stem = STEMS[offset.rem_euclid(10) as usize];
    let branch = BRANCHES[offset.rem_euclid(12) as usize];
    format!("{}{}", stem, branch)
}

/// Truncate to at most `max_chars` characters, marking the cut with an ellipsis.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct PlanBuilder {
    focus_year: i32,
    reading_temperature: f32,
    compatibility_temperature: f32,
    chat_context_chars: usize,
}

impl PlanBuilder {
    pub fn new(focus_year: i32) -> Self {
        Self::from_config(&AnalysisConfig {
            focus_year: Some(focus_year),
            ..Default::default()
        })
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            focus_year: config.focus_year(),
            reading_temperature: config.reading_temperature,
            compatibility_temperature: config.compatibility_temperature,
            chat_context_chars: config.chat_context_chars,
        }
    }

    fn focus_label(&self) -> String {
        format!("{} {}年", self.focus_year, sexagenary_year(self.focus_year))
    }

    pub fn build(&self, request: PlanRequest<'_>) -> OracleResult<QueryPlan> {
        match request {
            PlanRequest::Reading { mode: AnalysisMode::Compatibility, .. } => Err(OracleError::InvalidRequest(
                "雙人合盤需要兩位命主資料".to_string(),
            )),
            PlanRequest::Reading { mode, input } => Ok(self.reading_plan(mode, input)),
            PlanRequest::Compatibility { first, second } => Ok(self.compatibility_plan(first, second)),
        }
    }

    fn reading_plan(&self, mode: AnalysisMode, input: &UserInput) -> QueryPlan {
        let profile = self.profile(mode);
        let mut sections = vec![
            format!("【角色設定】\n{}", profile.persona),
            "【任務】\n請對命主進行八字論命，並回傳符合 Schema 的 JSON。輸出分為「classical 專業古文」與「modern 白話解讀」兩部分。".to_string(),
            profile_section(&profile),
            calendar_section(&[("命主", input)]),
        ];
        if let Some(section) = unknown_time_section(&[("命主", input)]) {
            sections.push(section);
        }
        sections.push(scoring_rubric());

        let prompt = format!(
            "命主資料：\n{}\n分析模式：{}\n\n請開始排盤並論命。",
            describe_input(input),
            mode.label()
        );

        QueryPlan {
            system_instruction: sections.join("\n\n"),
            prompt,
            schema: analysis_schema(&profile, input, None),
            temperature: Some(self.reading_temperature),
        }
    }

    fn compatibility_plan(&self, first: &UserInput, second: &UserInput) -> QueryPlan {
        let profile = self.profile(AnalysisMode::Compatibility);
        let people = [("甲方", first), ("乙方", second)];
        let mut sections = vec![
            format!("【身分設定】\n{}", profile.persona),
            "【核心任務】\n請對兩位命主（甲方、乙方）進行「八字合盤」，chart 為甲方命盤、chart2 為乙方命盤，並依照 Schema 回傳 JSON。".to_string(),
            "【分析邏輯】\n\
             1. **排盤**：分別排出甲、乙雙方的四柱八字。\n\
             2. **日主適配**：分析雙方日元屬性（如：強金配弱木）、五行喜忌是否互補，請詳細說明。若甲方喜火而乙方火旺，則乙方對甲方有「幫夫/幫妻」之運。\n\
             3. **刑沖會合**：檢查雙方年柱（根基）、日支（配偶宮）之間是否有六合、三合（大吉）或六沖、刑害（需注意）。"
                .to_string(),
            profile_section(&profile),
            calendar_section(&people),
        ];
        if let Some(section) = unknown_time_section(&people) {
            sections.push(section);
        }
        sections.push(scoring_rubric());

        let prompt = format!(
            "【甲方資料 (Person A)】\n{}\n\n【乙方資料 (Person B)】\n{}\n\n請進行八字合婚分析。",
            describe_input(first),
            describe_input(second)
        );

        QueryPlan {
            system_instruction: sections.join("\n\n"),
            prompt,
            schema: analysis_schema(&profile, first, Some(second)),
            temperature: Some(self.compatibility_temperature),
        }
    }

    fn profile(&self, mode: AnalysisMode) -> ModeProfile {
        let focus = self.focus_label();
        let year = self.focus_year;
        match mode {
            AnalysisMode::Basic => ModeProfile {
                persona: "你是一位鑽研八字三十年的命理宗師，精通《三命通會》、《淵海子平》、《滴天髓》，師承徐樂吾、梁湘潤。",
                emphasis: format!(
                    "論命七步驟：排四柱（注意節氣）→ 依《子平真詮》定格局與日主強弱 → 取用神（扶抑、通關、病藥、調候）→ 依梁湘潤古法查空亡 → 標註關鍵神煞 → 推算當前大運並重點分析 {} → 總結。",
                    focus
                ),
                score_meaning: "針對本命八字格局層次、強弱與一生總運的綜合評分 (0-100)。分數越高代表格局越好、阻礙越少。".to_string(),
                radar_meaning: "請針對「本命（原局）一生格局」的各面向評分。".to_string(),
                radar_axes: [
                    ("career", "事業運/官殺強度".to_string()),
                    ("wealth", "財運/財星強度".to_string()),
                    ("love", "感情/夫妻宮狀態".to_string()),
                    ("health", "健康/五行平衡度".to_string()),
                    ("social", "人際/比劫助力".to_string()),
                    ("family", "家庭/印星食傷狀態".to_string()),
                ],
                luck_tips: "針對八字五行缺憾提供 3-4 個補運建議（例如：缺水者多穿黑衣、佩戴黑曜石）。".to_string(),
                questions: "提出三個命主最想知道、且「最容易執行」的改運追問（例如：「辦公桌要放什麼能防小人？」）。",
                classical_style: "使用半文半白，模仿《徐樂吾自評》語氣，語氣肯定直斷，並引用經典（如：「書云...」）。",
                modern_style: format!(
                    "用溫暖易懂的現代語言解釋上述專業內容，著重「個性特質」、「事業財運建議」與「{}具體運勢」，並說明理由（例如：「因為你命中缺火，所以...」）。",
                    focus
                ),
            },
            AnalysisMode::Yearly => ModeProfile {
                persona: "你是一位專精流年推斷的八字命理大師，熟稔《三命通會》、《淵海子平》之歲運論法。",
                emphasis: format!(
                    "【特殊任務：流年運勢模式】\n請以 {} 的流年為分析窗口，說明流年干支與原局、當前大運的生剋制化，逐季指出吉凶重點。本命格局只作背景，不展開一生論述。",
                    focus
                ),
                score_meaning: format!(
                    "針對 {} 流年運勢吉凶的綜合評分 (0-100)。分數越高代表流年越順遂，分數低則代表需保守防禦。",
                    focus
                ),
                radar_meaning: format!("請針對「{} 流年運勢的各面向」來評分。", focus),
                radar_axes: [
                    ("career", format!("{}年事業起伏/官殺引動", year)),
                    ("wealth", format!("{}年財運進退/財星透出", year)),
                    ("love", format!("{}年感情變化/夫妻宮受沖合", year)),
                    ("health", format!("{}年健康風險/五行失衡", year)),
                    ("social", format!("{}年人際貴人/比劫爭奪", year)),
                    ("family", format!("{}年家宅平安/印星庇蔭", year)),
                ],
                luck_tips: format!(
                    "針對 {} 流年煞氣或不足之處，提供三個化解小撇步（例如：配戴紅繩、多往南方走）。",
                    focus
                ),
                questions: "從使用者的角度，提出三個針對「當下最急迫改善」的追問（例如：「如何提升今年的偏財運？」）。",
                classical_style: "以古文斷語逐一點出流年與原局之刑沖合害，語氣直斷。",
                modern_style: format!(
                    "以白話分段說明 {} 的整體走勢、每季重點、需防範之事，使用 Markdown 小標題。",
                    focus
                ),
            },
            AnalysisMode::Scholarly => ModeProfile {
                persona: "你是一位以嚴謹學術態度研究命理古籍的學者，熟讀《子平真詮》、《滴天髓》、《窮通寶鑑》、《神峰通考》。",
                emphasis: "【特殊任務：學術研究模式】\n請以嚴謹的學術態度，深入探討命主的八字格局歸類，逐條引用經典原文進行論證，並比較不同流派（子平格局派、滴天髓旺衰派、窮通調候派）對此造的判斷異同。".to_string(),
                score_meaning: "依古籍格局分類判定之本命格局高低層次評分 (0-100)。分數越高代表格局越純粹、成格越高。".to_string(),
                radar_meaning: "請針對「本命（原局）的潛質」來評分，每一軸對應一個十神或宮位的古法評價。".to_string(),
                radar_axes: [
                    ("career", "官殺格局之清濁".to_string()),
                    ("wealth", "財星之有根無根".to_string()),
                    ("love", "夫妻宮與配偶星之配置".to_string()),
                    ("health", "五行寒暖燥濕之調候".to_string()),
                    ("social", "比劫之幫身或奪財".to_string()),
                    ("family", "印綬食傷之生化".to_string()),
                ],
                luck_tips: "提供古法補運之建議（例如：祭拜某神祇、閱讀某經典）。".to_string(),
                questions: "提出三個專業的學術追問（例如：「此造是用神無力還是格局被破？」）。",
                classical_style: "以考據筆法書寫，每一論點皆須標明出處（書名與篇章）。",
                modern_style: "以現代學術語言整理各流派觀點與本造之對應，條列論證過程，使用 Markdown。".to_string(),
            },
            AnalysisMode::Compatibility => ModeProfile {
                persona: "你是一位精通《三命通會》、《合婚寶鑑》的八字合婚專家。",
                emphasis: "比較雙方命盤：五行互補、日主適配、年柱與日支之間的刑沖合害，聚焦兩人關係而非個人命運。".to_string(),
                score_meaning: "針對兩人契合度、五行互補性的綜合評分 (0-100)。".to_string(),
                radar_meaning: "六維改為雙人合盤指數，評的是兩人之間的互動，而非個人特質。".to_string(),
                radar_axes: [
                    ("career", "事業互助指數".to_string()),
                    ("wealth", "財運互旺指數".to_string()),
                    ("love", "情感契合指數".to_string()),
                    ("health", "健康互補指數".to_string()),
                    ("social", "溝通默契指數".to_string()),
                    ("family", "價值觀/家庭指數".to_string()),
                ],
                luck_tips: "提供 3-4 個雙方可一起實行的五行互補建議（例如：多用綠色，或一起去南方旅遊）。".to_string(),
                questions: "提出三個這對伴侶最可能想追問的問題（例如：「我們適合什麼時候結婚？」）。",
                classical_style: "引用古籍合婚口訣（如：「金土夫妻好姻緣...」），並解釋其在兩人命盤的應驗。",
                modern_style: "必須使用 Markdown 結構化輸出，禁止擠在同一段，依序包含：\n   ### ❤️ 性格互動與氣氛\n   ### ⚡️ 衝突熱點 (地雷區)\n   ### 🔮 五行互補建議\n   ### 💡 經營關係金句\n   summary 以一句話形容這段關係。".to_string(),
            },
        }
    }

    /// Instruction grounding a follow-up chat on a finished reading.
    pub fn chat_instruction(&self, context: &AnalysisResponse) -> String {
        format!(
            "你現在正與命主進行對話。你已經為命主算完八字。\n\n\
             【命主八字資訊】\n\
             日元：{}\n\
             格局與分析重點：{}\n\
             古文判詞參考：{}\n\n\
             【對話規則】\n\
             1. 保持「三十年經驗命理大師」的人設。\n\
             2. 語氣可以比論命時輕鬆一點，但仍需帶有專業權威感。\n\
             3. 針對使用者的問題，依據八字原理回答。\n\
             4. 若使用者問及{}年運勢，請再次強調流年{}的影響。",
            context.chart.day_master,
            context.summary,
            excerpt(&context.classical, self.chat_context_chars),
            self.focus_year,
            sexagenary_year(self.focus_year)
        )
    }

    /// Daily draw keyed on `date`; no personal input.
    pub fn daily_plan(&self, date: NaiveDate) -> QueryPlan {
        let day = date.format("%Y-%m-%d");
        QueryPlan {
            system_instruction: "你是一位每日開運大師，為每位來訪者抽出當日的運勢靈籤。".to_string(),
            prompt: format!(
                "請給我今天的運勢靈籤。\n日期：{}\n\n請回傳 JSON：幸運色、幸運數字 (0-99)、吉方、一句充滿禪意的開運詩句 (10-15字)、一句具體的行動建議 (20字內)。",
                day
            ),
            schema: daily_schema(),
            temperature: None,
        }
    }
}

fn profile_section(profile: &ModeProfile) -> String {
    let axes: Vec<String> = profile
        .radar_axes
        .iter()
        .map(|(axis, meaning)| format!("   - {}: {}", axis, meaning))
        .collect();
    format!(
        "【分析重點】\n{}\n\n\
         **評分 (score) 重點**：{}\n\
         **雷達圖 (radar) 重點**：{}\n{}\n\
         **luckTips (開運錦囊)**：{}\n\
         **suggestedQuestions (建議提問)**：{}\n\n\
         【輸出風格要求】\n\
         1. **classical**：{}\n\
         2. **modern**：{}",
        profile.emphasis,
        profile.score_meaning,
        profile.radar_meaning,
        axes.join("\n"),
        profile.luck_tips,
        profile.questions,
        profile.classical_style,
        profile.modern_style
    )
}

fn calendar_section(people: &[(&str, &UserInput)]) -> String {
    let mut lines = vec![
        "【重要：曆法換算】".to_string(),
        "一律依節氣（立春為年界、各節為月界）定年柱與月柱，並以真太陽時定時柱。".to_string(),
    ];
    for (who, input) in people {
        if input.calendar != CalendarType::Lunar {
            continue;
        }
        lines.push(format!(
            "{}提供的是「農曆」日期：你必須先將其換算為對應年份的「國曆（西元）」日期，再以節氣決定年柱與月柱，不可直接以農曆月份起月柱。",
            who
        ));
        if input.leap_month_applies() {
            lines.push(format!(
                "{}的出生月份為「閏月」：換算國曆時必須以閏月計算，不可當成同名的正月份。",
                who
            ));
        }
    }
    lines.join("\n")
}

fn unknown_time_section(people: &[(&str, &UserInput)]) -> Option<String> {
    let unknown: Vec<&str> = people
        .iter()
        .filter(|(_, input)| input.time_unknown())
        .map(|(who, _)| *who)
        .collect();
    if unknown.is_empty() {
        return None;
    }
    Some(format!(
        "【時辰不詳】\n{} 的出生時辰不詳，所附時間僅為占位值。\n\
         1. 只用年、月、日三柱論命，時柱一律視為不可靠。\n\
         2. 不得作出任何依賴時柱的論斷（子女宮、晚年運、時柱十神與神煞、時柱參與的合沖）。\n\
         3. {}",
        unknown.join("、"),
        REDUCED_CONFIDENCE_DISCLOSURE
    ))
}

// 评分标准，所有模式共用，保证各模式分数分布可比
fn scoring_rubric() -> String {
    "【評分標準 (Scoring Rubric)】\n\
     分數區間：\n\
     - 90-100：極佳（上等格局／大吉）\n\
     - 80-89：良好但有瑕疵\n\
     - 70-79：普通中平\n\
     - 60-69：需要努力經營\n\
     - 60 以下：宜保守防範\n\
     基準分為 60 分，依下列項目加減：\n\
     1. **格局層次**：成格且用神有力 (+10~15)；成格但有瑕疵 (+5~10)；普通格局 (+0~5)。\n\
     2. **日主強弱與用神**：日主中和、用神得力 (+10)；偏強偏弱但有藥可醫 (+5)；過旺過弱且無救應 (-5)。\n\
     3. **刑沖會合**：帶天乙貴人、天德月德 (+5)；帶桃花、文昌 (+2~3)；地支沖剋嚴重且無解救 (-5~-10)。\n\
     請務必客觀，score 與 radar 各軸皆為 0-100 的整數。"
        .to_string()
}

fn describe_input(input: &UserInput) -> String {
    let calendar = if input.leap_month_applies() {
        format!("{}（閏月）", input.calendar.label())
    } else {
        input.calendar.label().to_string()
    };
    let time = if input.time_unknown() {
        format!("時辰不詳（以 {} 占位，不可據以論斷）", input.effective_time())
    } else {
        input.effective_time().to_string()
    };
    format!(
        "日期類型：{}\n出生日期：{}\n出生時間：{}\n性別：{}",
        calendar,
        input.birth_date,
        time,
        input.gender.label()
    )
}

fn pillar_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "stem": { "type": "STRING", "description": "天干" },
            "branch": { "type": "STRING", "description": "地支" },
            "element": { "type": "STRING", "description": "五行" }
        },
        "required": ["stem", "branch"]
    })
}

fn chart_schema(description: &str, time_unknown: bool) -> Value {
    let mut hour = pillar_schema();
    let mut required = vec!["year", "month", "day", "hour", "currentDaYun", "me"];
    if time_unknown {
        hour["description"] = json!(UNRELIABLE_HOUR_NOTE);
        hour["nullable"] = json!(true);
        required.retain(|field| *field != "hour");
    } else {
        hour["description"] = json!("時柱");
    }

    json!({
        "type": "OBJECT",
        "description": description,
        "properties": {
            "year": pillar_schema(),
            "month": pillar_schema(),
            "day": pillar_schema(),
            "hour": hour,
            "currentDaYun": { "type": "STRING", "description": "當前大運" },
            "me": { "type": "STRING", "description": "日元" }
        },
        "required": required
    })
}

fn analysis_schema(profile: &ModeProfile, first: &UserInput, second: Option<&UserInput>) -> Value {
    let mut radar_properties = serde_json::Map::new();
    for (axis, meaning) in &profile.radar_axes {
        radar_properties.insert(
            axis.to_string(),
            json!({ "type": "NUMBER", "description": meaning }),
        );
    }
    let axis_names: Vec<&str> = profile.radar_axes.iter().map(|(axis, _)| *axis).collect();

    let chart_description = if second.is_some() {
        "甲方的四柱八字。必須依據天文曆法精確換算節氣。"
    } else {
        "精準計算的四柱八字。必須依據天文曆法精確換算節氣。"
    };

    let mut schema = json!({
        "type": "OBJECT",
        "properties": {
            "chart": chart_schema(chart_description, first.time_unknown()),
            "classical": {
                "type": "STRING",
                "description": format!("專業古文論斷（Markdown 格式）。{}", profile.classical_style)
            },
            "modern": {
                "type": "STRING",
                "description": "給現代人看的白話文深度解讀（Markdown 格式）。"
            },
            "summary": {
                "type": "STRING",
                "description": "一句話的精闢總結（約20-30字），一針見血。"
            },
            "score": { "type": "NUMBER", "description": profile.score_meaning },
            "radar": {
                "type": "OBJECT",
                "description": format!("六維分析 (0-100分)。{}", profile.radar_meaning),
                "properties": Value::Object(radar_properties),
                "required": axis_names
            },
            "luckTips": {
                "type": "ARRAY",
                "description": profile.luck_tips,
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "title": { "type": "STRING", "description": "錦囊標題" },
                        "content": { "type": "STRING", "description": "具體實行方法 (20字內)" }
                    },
                    "required": ["title", "content"]
                }
            },
            "suggestedQuestions": {
                "type": "ARRAY",
                "description": profile.questions,
                "items": { "type": "STRING" }
            }
        },
        "required": ["chart", "classical", "modern", "summary", "score", "radar", "luckTips", "suggestedQuestions"]
    });

    if let Some(second) = second {
        schema["properties"]["chart2"] =
            chart_schema("乙方的四柱八字。必須依據天文曆法精確換算節氣。", second.time_unknown());
        if let Some(required) = schema["required"].as_array_mut() {
            required.insert(1, json!("chart2"));
        }
    }
    schema
}

fn daily_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "luckyColor": { "type": "STRING", "description": "幸運色 (例如：珊瑚紅)" },
            "luckyNumber": { "type": "STRING", "description": "幸運數字 (0-99)" },
            "luckyDirection": { "type": "STRING", "description": "吉方 (例如：西北方)" },
            "quote": { "type": "STRING", "description": "一句充滿禪意的開運詩句 (10-15字)" },
            "advice": { "type": "STRING", "description": "一句具體的行動建議 (20字內)" }
        },
        "required": ["luckyColor", "luckyNumber", "luckyDirection", "quote", "advice"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chart, Gender, RadarScores};

    fn builder() -> PlanBuilder {
        PlanBuilder::new(2026)
    }

    fn person_a() -> UserInput {
        UserInput::new("1989-02-10", "13:30", Gender::Male)
    }

    fn person_b() -> UserInput {
        UserInput::new("1990-06-15", "12:00", Gender::Female)
    }

    fn reading(mode: AnalysisMode, input: &UserInput) -> QueryPlan {
        builder().build(PlanRequest::Reading { mode, input }).unwrap()
    }

    #[test]
    fn test_sexagenary_year() {
        assert_eq!(sexagenary_year(1984), "甲子");
        assert_eq!(sexagenary_year(2026), "丙午");
        assert_eq!(sexagenary_year(2025), "乙巳");
        assert_eq!(sexagenary_year(1983), "癸亥");
    }

    #[test]
    fn test_excerpt_is_char_safe() {
        assert_eq!(excerpt("金水傷官喜見官", 4), "金水傷官...");
        assert_eq!(excerpt("短文", 500), "短文");
    }

    #[test]
    fn test_score_meaning_differs_per_mode() {
        let input = person_a();
        let basic = reading(AnalysisMode::Basic, &input);
        let yearly = reading(AnalysisMode::Yearly, &input);
        let scholarly = reading(AnalysisMode::Scholarly, &input);

        let score = |plan: &QueryPlan| plan.schema["properties"]["score"]["description"].as_str().unwrap().to_string();
        assert!(score(&basic).contains("一生總運"));
        assert!(score(&yearly).contains("2026 丙午年"));
        assert!(score(&scholarly).contains("格局分類"));
        assert!(yearly.system_instruction.contains("流年運勢模式"));
        assert!(scholarly.system_instruction.contains("學術研究模式"));
    }

    #[test]
    fn test_shared_rubric_in_every_mode() {
        let a = person_a();
        let b = person_b();
        let mut plans: Vec<QueryPlan> = [AnalysisMode::Basic, AnalysisMode::Yearly, AnalysisMode::Scholarly]
            .into_iter()
            .map(|mode| reading(mode, &a))
            .collect();
        plans.push(builder().build(PlanRequest::Compatibility { first: &a, second: &b }).unwrap());

        for plan in plans {
            for band in ["90-100", "80-89", "70-79", "60-69", "60 以下"] {
                assert!(plan.system_instruction.contains(band), "missing band {}", band);
            }
        }
    }

    #[test]
    fn test_single_modes_have_no_chart2() {
        let input = person_a();
        for mode in [AnalysisMode::Basic, AnalysisMode::Yearly, AnalysisMode::Scholarly] {
            let plan = reading(mode, &input);
            assert!(plan.schema["properties"].get("chart2").is_none());
            let required = plan.schema["required"].as_array().unwrap();
            assert!(!required.contains(&json!("chart2")));
        }
    }

    #[test]
    fn test_reading_rejects_compatibility_mode() {
        let input = person_a();
        let err = builder()
            .build(PlanRequest::Reading { mode: AnalysisMode::Compatibility, input: &input })
            .unwrap_err();
        assert!(matches!(err, OracleError::InvalidRequest(_)));
    }

    #[test]
    fn test_request_mode() {
        let (a, b) = (person_a(), person_b());
        assert_eq!(PlanRequest::Reading { mode: AnalysisMode::Yearly, input: &a }.mode(), AnalysisMode::Yearly);
        assert_eq!(PlanRequest::Compatibility { first: &a, second: &b }.mode(), AnalysisMode::Compatibility);
    }

    #[test]
    fn test_lunar_leap_month_instruction() {
        let input = person_a().lunar(true);
        let plan = reading(AnalysisMode::Basic, &input);
        assert!(plan.system_instruction.contains("換算為對應年份的「國曆（西元）」日期"));
        assert!(plan.system_instruction.contains("閏月"));
        assert!(plan.prompt.contains("農曆（閏月）"));

        let gregorian = reading(AnalysisMode::Basic, &person_a());
        assert!(!gregorian.system_instruction.contains("提供的是「農曆」日期"));
        assert!(!gregorian.prompt.contains("閏月"));
    }

    #[test]
    fn test_unknown_time_reduces_to_three_pillars() {
        let input = person_a().with_unknown_time();
        let plan = reading(AnalysisMode::Basic, &input);
        assert!(plan.system_instruction.contains("只用年、月、日三柱"));
        assert!(plan.system_instruction.contains(REDUCED_CONFIDENCE_DISCLOSURE));
        assert!(plan.prompt.contains("時辰不詳"));
        assert!(!plan.prompt.contains("13:30"));

        let hour = &plan.schema["properties"]["chart"]["properties"]["hour"];
        assert_eq!(hour["nullable"], true);
        assert_eq!(hour["description"], UNRELIABLE_HOUR_NOTE);

        let known = reading(AnalysisMode::Basic, &person_a());
        assert!(!known.system_instruction.contains(REDUCED_CONFIDENCE_DISCLOSURE));
        assert!(known.schema["properties"]["chart"]["properties"]["hour"].get("nullable").is_none());
    }

    #[test]
    fn test_compatibility_second_person_unknown_time() {
        let a = person_a();
        let b = person_b().with_unknown_time();
        let plan = builder().build(PlanRequest::Compatibility { first: &a, second: &b }).unwrap();

        let chart2_hour = &plan.schema["properties"]["chart2"]["properties"]["hour"];
        assert_eq!(chart2_hour["nullable"], true);
        assert_eq!(chart2_hour["description"], UNRELIABLE_HOUR_NOTE);
        let chart2_required = plan.schema["properties"]["chart2"]["required"].as_array().unwrap();
        assert!(!chart2_required.contains(&json!("hour")));

        // 甲方时辰已知，不受影响
        let chart_hour = &plan.schema["properties"]["chart"]["properties"]["hour"];
        assert!(chart_hour.get("nullable").is_none());

        assert!(plan.system_instruction.contains(REDUCED_CONFIDENCE_DISCLOSURE));
        assert!(plan.system_instruction.contains("乙方 的出生時辰不詳"));
    }

    #[test]
    fn test_compatibility_schema_and_radar() {
        let a = person_a();
        let b = person_b();
        let plan = builder().build(PlanRequest::Compatibility { first: &a, second: &b }).unwrap();

        assert!(plan.schema["required"].as_array().unwrap().contains(&json!("chart2")));
        assert_eq!(plan.schema["properties"]["radar"]["properties"]["love"]["description"], "情感契合指數");
        assert!(plan.system_instruction.contains("刑沖會合"));
        assert!(plan.system_instruction.contains("五行喜忌是否互補"));
        assert!(plan.prompt.contains("甲方資料"));
        assert!(plan.prompt.contains("乙方資料"));
        assert_eq!(plan.temperature, Some(0.6));
    }

    #[test]
    fn test_radar_axes_required_in_every_mode() {
        let input = person_a();
        let plan = reading(AnalysisMode::Yearly, &input);
        let required = plan.schema["properties"]["radar"]["required"].as_array().unwrap();
        assert_eq!(required.len(), 6);
        assert!(
            plan.schema["properties"]["radar"]["properties"]["wealth"]["description"]
                .as_str()
                .unwrap()
                .starts_with("2026年")
        );
    }

    #[test]
    fn test_chat_instruction_caps_classical_excerpt() {
        let context = AnalysisResponse {
            chart: Chart { day_master: "甲木".to_string(), ..Default::default() },
            chart2: None,
            classical: "論".repeat(800),
            modern: String::new(),
            summary: "木火通明".to_string(),
            score: 80.0,
            radar: RadarScores::default(),
            luck_tips: vec![],
            suggested_questions: vec![],
            used_model: None,
        };
        let instruction = builder().chat_instruction(&context);
        assert!(instruction.contains("日元：甲木"));
        assert!(instruction.contains("木火通明"));
        assert!(instruction.contains(&format!("{}...", "論".repeat(500))));
        assert!(!instruction.contains(&"論".repeat(501)));
        assert!(instruction.contains("丙午"));
    }

    #[test]
    fn test_daily_plan_is_date_keyed() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let plan = builder().daily_plan(date);
        assert!(plan.prompt.contains("2026-10-15"));
        let required = plan.schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 5);
    }
}
