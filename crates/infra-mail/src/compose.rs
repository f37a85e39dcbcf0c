// Plain-text bodies for the three transactional emails

/// Subject and body ready to hand to a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedEmail {
    pub subject: String,
    pub body: String,
}

fn greeting(name: Option<&str>) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("Hi {},", name),
        None => "Hi,".to_string(),
    }
}

pub(crate) fn verification(token: &str, name: Option<&str>) -> ComposedEmail {
    ComposedEmail {
        subject: "Verify your email address".to_string(),
        body: format!(
            "{}\n\nUse the code below to verify your email address:\n\n    {}\n\n\
             If you did not create an account, you can ignore this message.\n",
            greeting(name),
            token
        ),
    }
}

pub(crate) fn invitation(company_name: &str, url: &str) -> ComposedEmail {
    ComposedEmail {
        subject: format!("You have been invited to join {}", company_name),
        body: format!(
            "Hi,\n\n{} has invited you to join their workspace on Paydesk.\n\n\
             Accept the invitation here:\n\n    {}\n",
            company_name, url
        ),
    }
}

pub(crate) fn welcome(name: Option<&str>, company_name: Option<&str>) -> ComposedEmail {
    let subject = match company_name {
        Some(company) => format!("Welcome to {} on Paydesk", company),
        None => "Welcome to Paydesk".to_string(),
    };
    ComposedEmail {
        subject,
        body: format!(
            "{}\n\nYour account is ready. You can sign in at any time to manage payroll.\n",
            greeting(name)
        ),
    }
}
