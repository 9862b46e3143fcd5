use crate::error::Result;
use crate::models::marking::MarkingResult;
use crate::models::question_block::{QuestionBlock, RenderGroup};
use crate::models::question_set::GeneratedSet;
use rust_xlsxwriter::*;
use std::fmt::Write as _;

const SEPARATOR: &str =
    " -------------------------------------------------------------------------------------------------";
const BOX_RULE: &str = "--------------------------------";

pub struct ExportService;

impl ExportService {
    fn header(out: &mut String, set_number: u32, date: &str) {
        let _ = writeln!(out, "{:>50}", "IELTS Listening Test");
        let _ = writeln!(out, "{:>45}", format!("Set {}", set_number));
        let _ = writeln!(out, "{:>48}", date);
        out.push('\n');
    }

    /// Writes `Part N` when the block opens a new part, a blank line otherwise.
    fn part_heading(out: &mut String, block: &QuestionBlock, previous: &mut Option<String>) {
        let section = block.section.trim().to_string();
        if previous.as_deref() != Some(section.as_str()) {
            let _ = writeln!(out, "{}", section);
        } else {
            out.push('\n');
        }
        *previous = Some(section);
    }

    fn block_body(out: &mut String, block: &QuestionBlock) {
        match block.render_group() {
            RenderGroup::Completion if block.has_diagram() => {
                let _ = writeln!(out, "{}\n", block.diagram.trim_end());
                out.push_str("Answers: \n");
                for q in &block.questions {
                    let _ = writeln!(out, "{}. ________________", q);
                }
            }
            RenderGroup::Completion | RenderGroup::Plain | RenderGroup::Unknown => {
                for q in &block.questions {
                    let _ = writeln!(out, "{}", q);
                }
            }
            RenderGroup::MultipleChoice => {
                if !block.options.is_empty() {
                    for q in &block.questions {
                        let _ = writeln!(out, "{}", q);
                        for o in &block.options {
                            let _ = writeln!(out, "{}", o);
                        }
                        out.push('\n');
                    }
                } else {
                    for q in &block.questions {
                        let _ = writeln!(out, "{}", q);
                    }
                }
            }
            RenderGroup::Matching => {
                let _ = writeln!(out, "{}", BOX_RULE);
                for o in &block.options {
                    let _ = writeln!(out, "    {}", o);
                }
                let _ = writeln!(out, "{}\n", BOX_RULE);
                for q in &block.questions {
                    let _ = writeln!(out, "{} _____________________", q);
                }
            }
            RenderGroup::Form => {
                let _ = writeln!(out, "{}", block.diagram.trim_end());
            }
        }
    }

    /// Candidate question paper.
    pub fn questions_txt(set: &GeneratedSet, set_number: u32, date: &str) -> String {
        let mut out = String::new();
        Self::header(&mut out, set_number, date);

        let mut previous = None;
        for block in &set.blocks {
            Self::part_heading(&mut out, block, &mut previous);
            let _ = writeln!(out, "{}\n", block.instructions.trim());
            Self::block_body(&mut out, block);
            let _ = writeln!(out, "\n{}", SEPARATOR);
        }
        out.push_str(&format!("{:>43}", "End of Paper"));
        out
    }

    pub fn transcript_txt(set: &GeneratedSet, set_number: u32, date: &str) -> String {
        let mut out = String::new();
        Self::header(&mut out, set_number, date);

        let mut previous = None;
        for block in &set.blocks {
            Self::part_heading(&mut out, block, &mut previous);
            let _ = writeln!(out, "{}", block.transcript.trim_end());
            let _ = writeln!(out, "\n{}", SEPARATOR);
        }
        out
    }

    /// Answers numbered continuously across the paper, grouped under part headings.
    pub fn answer_key_txt(set: &GeneratedSet, set_number: u32, date: &str) -> String {
        let mut out = String::new();
        Self::header(&mut out, set_number, date);
        out.push_str("Answers\n\n");

        let mut number = 1;
        let mut previous = None;
        for block in &set.blocks {
            Self::part_heading(&mut out, block, &mut previous);
            for answer in &block.answers {
                let _ = writeln!(out, "{}. {}", number, answer);
                number += 1;
            }
        }
        out
    }

    /// Styled summary of a marking batch: one row per candidate.
    pub fn marking_summary_xlsx(set_label: &str, results: &[MarkingResult]) -> Result<Vec<u8>> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name("Marking Summary")?;

        let title_bg = Color::RGB(0xE71010);
        let header_bg = Color::RGB(0x0F172A);
        let alt_row = Color::RGB(0xF8FAFC);
        let border_color = Color::RGB(0xE2E8F0);

        let columns = [("Candidate Name", 36.0), ("Mark", 14.0), ("Grade (Band)", 16.0)];
        for (i, (_, width)) in columns.iter().enumerate() {
            worksheet.set_column_width(i as u16, *width)?;
        }

        let title_format = Format::new()
            .set_font_size(16)
            .set_bold()
            .set_font_color(Color::White)
            .set_background_color(title_bg)
            .set_align(FormatAlign::Center)
            .set_align(FormatAlign::VerticalCenter);
        worksheet.set_row_height(0, 32)?;
        worksheet.merge_range(0, 0, 0, (columns.len() - 1) as u16, set_label, &title_format)?;

        let subtitle_format = Format::new()
            .set_font_size(10)
            .set_italic()
            .set_align(FormatAlign::Center);
        let marked_at = chrono::Utc::now().format("%d %B %Y, %I:%M %p").to_string();
        worksheet.merge_range(1, 0, 1, (columns.len() - 1) as u16, &marked_at, &subtitle_format)?;

        let header_format = Format::new()
            .set_bold()
            .set_font_color(Color::White)
            .set_background_color(header_bg)
            .set_align(FormatAlign::Center)
            .set_border(FormatBorder::Thin)
            .set_border_color(border_color);
        let header_row = 2;
        for (i, (name, _)) in columns.iter().enumerate() {
            worksheet.write_string_with_format(header_row, i as u16, *name, &header_format)?;
        }

        for (idx, result) in results.iter().enumerate() {
            let row = header_row + 1 + idx as u32;
            let bg = if idx % 2 == 0 { alt_row } else { Color::White };
            let base_fmt = Format::new()
                .set_background_color(bg)
                .set_border(FormatBorder::Thin)
                .set_border_color(border_color);
            let center_fmt = base_fmt.clone().set_align(FormatAlign::Center);

            worksheet.write_string_with_format(row, 0, &result.candidate_name, &base_fmt)?;
            worksheet.write_string_with_format(row, 1, &result.total_marks, &center_fmt)?;
            worksheet.write_string_with_format(row, 2, &result.band, &center_fmt)?;
        }

        worksheet.set_freeze_panes(header_row + 1, 0)?;
        Ok(workbook.save_to_buffer()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::marking::IncorrectAnswer;
    use std::collections::BTreeMap;

    fn block(section: &str, code: &str) -> QuestionBlock {
        QuestionBlock {
            section: section.to_string(),
            question_type: code.to_string(),
            instructions: format!("Instructions for {}", code),
            questions: vec!["1".to_string(), "2".to_string()],
            options: vec!["A library".to_string(), "B museum".to_string()],
            diagram: String::new(),
            answers: vec![format!("{}-a", code), format!("{}-b", code)],
            transcript: format!("Narrator: {} transcript", code),
        }
    }

    fn sample_set() -> GeneratedSet {
        let mut form = block("Part 1", "T002");
        form.diagram = "Name: ______\nPhone: ______".to_string();
        GeneratedSet {
            key: "2026_03_07_14_05_09".to_string(),
            blocks: vec![
                form,
                block("Part 2", "T005"),
                block("Part 2", "T006"),
                block("Part 3", "T009"),
            ],
            requests: vec![],
            reports: vec![],
            logs: vec![],
        }
    }

    #[test]
    fn questions_paper_layout() {
        let text = ExportService::questions_txt(&sample_set(), 4, "07 March 2026");
        assert!(text.contains("IELTS Listening Test"));
        assert!(text.contains("Set 4"));
        assert!(text.contains("07 March 2026"));
        assert_eq!(text.matches("Part 2\n").count(), 1);
        assert!(text.contains("Name: ______\nPhone: ______"));
        assert!(text.contains("1\nA library\nB museum\n\n2\nA library"));
        assert!(text.contains("    A library"));
        assert!(text.contains("1 _____________________"));
        assert!(text.trim_end().ends_with("End of Paper"));
    }

    #[test]
    fn diagram_completion_lists_answer_blanks() {
        let mut notes = block("Part 4", "T001");
        notes.diagram = "Notes on bees".to_string();
        let set = GeneratedSet {
            key: "2026_03_07_14_05_09".to_string(),
            blocks: vec![notes],
            requests: vec![],
            reports: vec![],
            logs: vec![],
        };
        let text = ExportService::questions_txt(&set, 1, "07 March 2026");
        assert!(text.contains("Notes on bees\n\nAnswers: \n1. ________________\n2. ________________"));
    }

    #[test]
    fn answer_key_numbers_continuously() {
        let text = ExportService::answer_key_txt(&sample_set(), 4, "07 March 2026");
        assert!(text.contains("1. T002-a\n2. T002-b\nPart 2\n3. T005-a"));
        assert!(text.contains("8. T009-b"));
    }

    #[test]
    fn transcript_groups_by_part() {
        let text = ExportService::transcript_txt(&sample_set(), 4, "07 March 2026");
        assert!(text.contains("Part 1\nNarrator: T002 transcript"));
        assert_eq!(text.matches("Part 2\n").count(), 1);
        assert_eq!(text.matches(SEPARATOR).count(), 4);
    }

    #[test]
    fn marking_summary_is_a_workbook() {
        let mut incorrect = BTreeMap::new();
        incorrect.insert(
            "3".to_string(),
            IncorrectAnswer {
                student_answer: "Monday".to_string(),
                correct_answer: "Tuesday".to_string(),
            },
        );
        let results = vec![MarkingResult {
            candidate_name: "Jane Doe".to_string(),
            total_marks: "31/40".to_string(),
            correct_answers: BTreeMap::new(),
            incorrect_answers: incorrect,
            band: "7.0".to_string(),
        }];
        let bytes = ExportService::marking_summary_xlsx("Set 4", &results).unwrap();
        // xlsx is a zip container
        assert_eq!(&bytes[..2], b"PK");
    }
}
