//! Output column schema for the CSV export.

use super::lead::{LeadRecord, Question};

/// Fixed columns present in every export, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseColumn {
    Email,
    FirstName,
    PhoneNumber,
    CompanyName,
    EmployeeSize,
    PublisherName,
    LinkedinCompany,
    LinkedinContact,
    DownloadedAssetName,
    State,
    Region,
    Address,
    Industry,
    IpAddress,
    Timestamp,
}

pub const BASE_COLUMNS: [BaseColumn; 15] = [
    BaseColumn::Email,
    BaseColumn::FirstName,
    BaseColumn::PhoneNumber,
    BaseColumn::CompanyName,
    BaseColumn::EmployeeSize,
    BaseColumn::PublisherName,
    BaseColumn::LinkedinCompany,
    BaseColumn::LinkedinContact,
    BaseColumn::DownloadedAssetName,
    BaseColumn::State,
    BaseColumn::Region,
    BaseColumn::Address,
    BaseColumn::Industry,
    BaseColumn::IpAddress,
    BaseColumn::Timestamp,
];

impl BaseColumn {
    pub fn title(&self) -> &'static str {
        match self {
            BaseColumn::Email => "Email",
            BaseColumn::FirstName => "First Name",
            BaseColumn::PhoneNumber => "Phone Number",
            BaseColumn::CompanyName => "Company Name",
            BaseColumn::EmployeeSize => "Employee Size",
            BaseColumn::PublisherName => "Publisher Name",
            BaseColumn::LinkedinCompany => "LinkedIn Company",
            BaseColumn::LinkedinContact => "LinkedIn Contact",
            BaseColumn::DownloadedAssetName => "Downloaded Asset Name",
            BaseColumn::State => "State",
            BaseColumn::Region => "Region",
            BaseColumn::Address => "Address",
            BaseColumn::Industry => "Industry",
            BaseColumn::IpAddress => "IP Address",
            BaseColumn::Timestamp => "Date/Time Stamp",
        }
    }

    fn value<'a>(&self, lead: &'a LeadRecord) -> &'a str {
        match self {
            BaseColumn::Email => &lead.email,
            BaseColumn::FirstName => &lead.full_name,
            BaseColumn::PhoneNumber => &lead.phone,
            BaseColumn::CompanyName => &lead.company_name,
            BaseColumn::EmployeeSize => &lead.employee_size,
            BaseColumn::PublisherName => &lead.publisher_name,
            BaseColumn::LinkedinCompany => &lead.linkedin_company,
            BaseColumn::LinkedinContact => &lead.linkedin_contact,
            BaseColumn::DownloadedAssetName => &lead.downloaded_asset_name,
            BaseColumn::State => &lead.state,
            BaseColumn::Region => &lead.region,
            BaseColumn::Address => &lead.address,
            BaseColumn::Industry => &lead.industry,
            BaseColumn::IpAddress => &lead.ip_address,
            BaseColumn::Timestamp => &lead.captured_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column {
    Base(BaseColumn),
    Question { id: String, title: String },
}

impl Column {
    pub fn title(&self) -> &str {
        match self {
            Column::Base(base) => base.title(),
            Column::Question { title, .. } => title,
        }
    }

    /// Cell value for `lead`; unanswered questions are empty.
    pub fn cell<'a>(&self, lead: &'a LeadRecord) -> &'a str {
        match self {
            Column::Base(base) => base.value(lead),
            Column::Question { id, .. } => lead.answer(id),
        }
    }
}

/// Ordered export columns: the base columns, then one column per question
/// in ascending display order (payload order breaks ties).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSchema {
    columns: Vec<Column>,
}

impl ExportSchema {
    pub fn new(questions: &[Question]) -> Self {
        let mut ordered: Vec<&Question> = questions.iter().collect();
        // sort_by_key is stable
        ordered.sort_by_key(|q| q.display_order);

        let columns = BASE_COLUMNS
            .iter()
            .copied()
            .map(Column::Base)
            .chain(ordered.into_iter().map(|q| Column::Question {
                id: q.id.clone(),
                title: q.question_text.clone(),
            }))
            .collect();

        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn headers(&self) -> Vec<&str> {
        self.columns.iter().map(Column::title).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn row<'a>(&'a self, lead: &'a LeadRecord) -> impl Iterator<Item = &'a str> + 'a {
        self.columns.iter().map(move |column| column.cell(lead))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str, text: &str, order: i64) -> Question {
        Question {
            id: id.to_string(),
            question_text: text.to_string(),
            display_order: order,
        }
    }

    #[test]
    fn test_base_columns_only() {
        let schema = ExportSchema::new(&[]);
        assert_eq!(schema.len(), 15);
        assert_eq!(schema.headers()[0], "Email");
        assert_eq!(schema.headers()[1], "First Name");
        assert_eq!(schema.headers()[14], "Date/Time Stamp");
    }

    #[test]
    fn test_questions_sorted_by_display_order_with_stable_ties() {
        let schema = ExportSchema::new(&[
            question("c", "Third", 5),
            question("a", "First", 1),
            question("b1", "Tie A", 3),
            question("b2", "Tie B", 3),
        ]);

        assert_eq!(
            &schema.headers()[15..],
            &["First", "Tie A", "Tie B", "Third"]
        );
    }

    #[test]
    fn test_row_aligns_answers_to_question_ids() {
        let schema = ExportSchema::new(&[question("q2", "Budget", 2), question("q1", "Timeline", 1)]);
        let mut lead = LeadRecord {
            email: "j@x.com".to_string(),
            ..Default::default()
        };
        lead.custom_answers.insert("q2".to_string(), "50k".to_string());

        let row: Vec<&str> = schema.row(&lead).collect();
        assert_eq!(row.len(), 17);
        assert_eq!(row[0], "j@x.com");
        assert_eq!(row[15], "");
        assert_eq!(row[16], "50k");
    }
}
