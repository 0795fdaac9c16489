pub const ELISION_MARKER: &str = "\n\n[... 中间文本省略 ...]\n\n";

/// Keep the head and tail of `text` when it exceeds `max_chars` characters.
pub fn truncate_middle(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }

    let head_chars = max_chars / 2;
    let tail_chars = max_chars - head_chars;
    let head: String = text.chars().take(head_chars).collect();
    let tail: String = text.chars().skip(total - tail_chars).collect();
    format!("{head}{ELISION_MARKER}{tail}")
}

pub fn identification_prompt(taxonomy_table: &str, text: &str) -> String {
    format!(
        r#"请分析以下航天电子元器件可靠性分析文档，识别文档中提到的物理状态组和物理状态。
只需标识哪些物理状态被提及，不需要提取具体的物理状态值。

物理状态组和物理状态参考表:
{taxonomy_table}
识别规则:
1. 参考表并非穷尽列表。文档描述了表中未列出、但明确属于某物理状态组的物理状态时，也要识别出来
2. "标识"章节通常对应标识组；"器件封装结构"章节通常对应封装结构、盖板、壳体、热沉、引出端组
3. "芯片"章节通常对应芯片平面结构、芯片纵向结构组；"键合系统"或"芯片的安装与互联"章节通常对应芯片安装、键合结构组
4. 多层镀层（如"镀Ni再镀Au"）只需识别一次"镀层材料"
5. 基于语义识别，不要只做关键词匹配；附图、附表部分不参与识别
6. 只输出JSON，不要输出解释

输出格式:
{{
  "identified_states": [
    {{"物理状态组": "封装结构", "物理状态": "封装形式"}},
    {{"物理状态组": "标识", "物理状态": "标识工艺"}}
  ]
}}

文本内容:
{text}
"#
    )
}

fn state_list(states: &[String]) -> String {
    states
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn extraction_prompt(group: &str, states: &[String], text: &str) -> String {
    format!(
        r#"请从以下航天电子元器件可靠性分析文本中，提取物理状态组"{group}"下列物理状态的信息:
{states}

字段说明:
- 典型物理状态值: 文中对该物理状态的具体描述，保持原文用词，不要编造；文中未提及时填"/"
- 禁限用信息: 只能是"可用"、"限用"、"禁用"或"/"
  - "可用": 常规结构、无可靠性隐患、工艺良好、满足宇航应用要求、未发现禁限用工艺与材料
  - "限用": 存在风险、限制条件使用、建议评估后使用、采取处理措施后使用
  - "禁用": 不适合宇航应用、有可靠性隐患、不满足标准要求、超标
- 测试评语: 文中对该物理状态的分析评价，没有则填"/"
- 试验项目: 确定该物理状态所用的试验，如外部目检、内部目检、制样镜检、成分分析、X射线检查、电性能测试、物理尺寸测量、内部气体成分分析(RGA)、镀层厚度检查、扫描电子显微镜检查（SEM），没有则填"/"

要求:
1. 输出一个JSON数组，元素个数必须等于上面列出的物理状态个数，顺序一致
2. 每个元素的"物理状态组"必须是"{group}"，"物理状态名称"必须与列表中的名称完全一致
3. 多层镀层按原文顺序写在同一个物理状态值中，用"；"分隔
4. 只输出JSON数组，不要输出解释

输出格式:
[
  {{"物理状态组": "{group}", "物理状态名称": "...", "典型物理状态值": "...", "禁限用信息": "...", "测试评语": "...", "试验项目": "..."}}
]

文本内容:
{text}
"#,
        states = state_list(states),
    )
}

/// Second attempt after a response that did not line up with the request.
pub fn tightened_extraction_prompt(group: &str, states: &[String], text: &str, received: usize) -> String {
    format!(
        r#"上一次回答包含 {received} 个元素，但需要恰好 {expected} 个，且顺序必须与下面的列表一致。
请重新回答，逐一对应下列物理状态，不要增加、遗漏或合并；文中未提及的物理状态也要输出，字段全部填"/"。

{base}"#,
        expected = states.len(),
        base = extraction_prompt(group, states, text),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_untouched() {
        assert_eq!(truncate_middle("器件封装结构", 100), "器件封装结构");
    }

    #[test]
    fn test_truncation_is_char_aware() {
        let text = "甲".repeat(60) + &"乙".repeat(60);
        let out = truncate_middle(&text, 20);

        assert!(out.starts_with(&"甲".repeat(10)));
        assert!(out.ends_with(&"乙".repeat(10)));
        assert!(out.contains("中间文本省略"));
    }

    #[test]
    fn test_extraction_prompt_lists_states_in_order() {
        let states = vec!["封装形式".to_string(), "管壳材料".to_string()];
        let prompt = extraction_prompt("封装结构", &states, "典型DIP金属陶瓷结构");

        let first = prompt.find("1. 封装形式").unwrap();
        let second = prompt.find("2. 管壳材料").unwrap();
        assert!(first < second);
        assert!(prompt.contains("典型DIP金属陶瓷结构"));
    }

    #[test]
    fn test_tightened_prompt_mentions_counts() {
        let states = vec!["丝径".to_string(), "键合工艺".to_string()];
        let prompt = tightened_extraction_prompt("键合结构", &states, "文本", 1);
        assert!(prompt.contains("包含 1 个元素"));
        assert!(prompt.contains("恰好 2 个"));
    }
}
