// src/fixtures.rs
//! Text-layer renderings of House disclosure forms shared by the unit tests.

pub(crate) const HOUSE_PTR: &str = "\
Clerk of the House of Representatives \u{2022} Legislative Resource Center
PERIODIC TRANSACTION REPORT
Filing ID #20022419
Filer Information
Name: Hon. Jane Q. Public
Status: Member
State/District: CA05
Transactions
ID Owner Asset Transaction Type Date Notification Date Amount Cap. Gains > $200?
SP Apple Inc. - Common Stock (AAPL) [ST] P 01/15/2023 01/20/2023 $1,001 - $15,000
F S: New
D: Purchase of common shares
Microsoft Corporation - Common
Stock (MSFT) [ST] S 02/01/2023 02/03/2023 $15,001 - $50,000
F S: New
JT US Treasury Note 4.5% [GS] P 03/10/2023 03/12/2023 $50,001 - $100,000
* For the complete list of asset type abbreviations, please visit https://fd.house.gov/reference/asset-type-codes.aspx.
Initial Public Offerings
Certification and Signature
Digitally Signed: Hon. Jane Q. Public , 03/15/2023
";

pub(crate) const HOUSE_ANNUAL: &str = "\
Clerk of the House of Representatives \u{2022} Legislative Resource Center
FINANCIAL DISCLOSURE REPORT
Filing ID #10056789
Filer Information
Name: Hon. John Doe
Status: Member
State/District: TX12
Filing Information
Filing Type: Annual Report
Filing Year: 2022
Filing Date: 05/15/2023
Schedule A: Assets and \"Unearned\" Income
Asset Owner Value of Asset Income Type(s) Income Current Year to Filing Income Preceding Year
Apple Inc. (AAPL) [ST] SP $15,001 - $50,000 Dividends $201 - $1,000 $201 - $1,000
Location: US
Rental Property, Austin TX [RP] JT $250,001 - $500,000 Rent $15,001 - $50,000 $15,001 - $50,000
\x0c
Schedule C: Earned Income
Source Type Amount
State of Texas Spouse Salary N/A
Schedule D: Liabilities
None disclosed.
Certification and Signature
Digitally Signed: Hon. John Doe , 05/15/2023
";

pub(crate) const HOUSE_EXTENSION: &str = "\
Clerk of the House of Representatives \u{2022} Legislative Resource Center
EXTENSION REQUEST
Name: Hon. Jane Q. Public
State/District: CA05
Report Type: Annual Report
Filing Year: 2022
Statement Due Date: 05/15/2023
Days Requested: 90
Date of Request: 05/01/2023
";

/// Leading bytes of a PNG; enough for format sniffing to call it image-only.
pub(crate) const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";
