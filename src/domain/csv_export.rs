use csv::{QuoteStyle, Terminator, WriterBuilder};

use super::lead::LeadRecord;

const HEADERS: [&str; 6] = ["Name", "Phone", "Email", "Website", "Address", "Source"];

/// Renders leads as CSV: a bare header row, then every data cell quoted.
pub fn leads_to_csv(leads: &[LeadRecord]) -> Result<String, csv::Error> {
    let mut buffer = Vec::new();

    {
        let mut header_writer = WriterBuilder::new()
            .terminator(Terminator::Any(b'\n'))
            .from_writer(&mut buffer);
        header_writer.write_record(HEADERS)?;
        header_writer.flush()?;
    }

    {
        let mut row_writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(&mut buffer);
        for lead in leads {
            row_writer.write_record([
                &lead.name,
                &lead.phone,
                &lead.email,
                &lead.website,
                &lead.address,
                &lead.source_url,
            ])?;
        }
        row_writer.flush()?;
    }

    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

pub fn export_file_name(unix_millis: u128) -> String {
    format!("leads_export_{}.csv", unix_millis)
}

#[cfg(test)]
mod tests {
    use super::{export_file_name, leads_to_csv};
    use crate::domain::lead::LeadRecord;

    #[test]
    fn quotes_commas_and_quotes() {
        let leads = vec![LeadRecord {
            name: "Shah \"Tools\", Pvt".to_string(),
            phone: "+91 79 2658 0000".to_string(),
            address: "Plot 12, GIDC Vatva".to_string(),
            ..Default::default()
        }];

        let csv = leads_to_csv(&leads).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "Name,Phone,Email,Website,Address,Source");
        assert_eq!(
            lines[1],
            r#""Shah ""Tools"", Pvt","+91 79 2658 0000","","","Plot 12, GIDC Vatva","""#
        );
    }

    #[test]
    fn multiline_address_stays_in_one_cell() {
        let leads = vec![LeadRecord {
            name: "Acme".to_string(),
            address: "Plot 4\nNaroda".to_string(),
            ..Default::default()
        }];

        let csv = leads_to_csv(&leads).unwrap();
        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();

        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][4], "Plot 4\nNaroda");
    }

    #[test]
    fn no_leads_is_header_only() {
        assert_eq!(
            leads_to_csv(&[]).unwrap(),
            "Name,Phone,Email,Website,Address,Source\n"
        );
    }

    #[test]
    fn file_name_carries_timestamp() {
        assert_eq!(export_file_name(1700000000000), "leads_export_1700000000000.csv");
    }
}
