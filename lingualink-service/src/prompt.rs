//! Deterministic system prompt construction.

/// Build the system prompt for a transcription request.
///
/// The prompt instructs the model to transcribe first, then translate
/// into each target language in the order given, and declares the
/// sectioned output format the reply parser expects: `原文：` for the
/// transcript followed by one section header per target language.
pub fn build_system_prompt(target_languages: &[String]) -> String {
    let mut lines =
        vec!["你是一个高级的语音处理助手。你的任务是：".to_string(), "1.首先将音频内容转录成其原始语言的文本。".to_string()];

    for (i, lang) in target_languages.iter().enumerate() {
        lines.push(format!("{}. 将转录的文本翻译成{lang}。", i + 2));
    }

    lines.push("请按照以下格式清晰地组织你的输出：".to_string());
    lines.push("原文：".to_string());
    for lang in target_languages {
        lines.push(format!("{lang}："));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerates_languages_in_order() {
        let prompt = build_system_prompt(&["英文".to_string(), "日文".to_string()]);
        let expected = "你是一个高级的语音处理助手。你的任务是：\n\
                        1.首先将音频内容转录成其原始语言的文本。\n\
                        2. 将转录的文本翻译成英文。\n\
                        3. 将转录的文本翻译成日文。\n\
                        请按照以下格式清晰地组织你的输出：\n\
                        原文：\n\
                        英文：\n\
                        日文：";
        assert_eq!(prompt, expected);
    }

    #[test]
    fn is_deterministic() {
        let langs = vec!["英文".to_string()];
        assert_eq!(build_system_prompt(&langs), build_system_prompt(&langs));
    }

    #[test]
    fn no_target_languages_still_requests_a_transcript() {
        let prompt = build_system_prompt(&[]);
        assert!(prompt.contains("原文："));
        assert!(!prompt.contains("2."));
    }
}
